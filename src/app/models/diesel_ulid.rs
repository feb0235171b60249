//! ULID primary keys, stored as their 26-character text form.
//!
//! Every row this crate owns (users, scheduled sends) is keyed by a ULID
//! rather than a serial: the id is generated before the insert, sorts by
//! creation time, and appears verbatim inside scheduled-send idempotency
//! keys (`"{user_id}:{message_type}:{scheduled_date}"`) and correlation
//! ids, so one identifier format flows from request logs through the queue
//! to the database.

use std::io::Write;

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsExpression, FromSqlRow, Serialize, Deserialize, ToSchema)]
#[diesel(sql_type = Text)]
pub struct DieselUlid(pub Ulid);

impl DieselUlid {
    pub fn new() -> Self {
        DieselUlid(Ulid::new())
    }
}

impl Default for DieselUlid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Ulid> for DieselUlid {
    fn from(ulid: Ulid) -> Self {
        DieselUlid(ulid)
    }
}

/// The canonical 26-character form, exactly as persisted.
impl std::fmt::Display for DieselUlid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql<Text, Pg> for DieselUlid {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.0.to_string().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for DieselUlid {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Ok(DieselUlid(Ulid::from_string(&s)?))
    }
}
