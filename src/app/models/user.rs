use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use super::DieselUlid;

/// A birthday message recipient.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    #[schema(example = "01ARZ3NDEKTSV4RRFFQ69G5FAV")]
    pub id: DieselUlid,
    #[schema(example = "John")]
    pub first_name: String,
    #[schema(example = "Doe")]
    pub last_name: String,
    #[schema(example = "john.doe@example.com")]
    pub email: String,
    /// Calendar birth date, no time component
    #[schema(example = "1990-01-15")]
    pub birthdate: NaiveDate,
    /// IANA timezone identifier
    #[schema(example = "America/New_York")]
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Create user payload for the service layer
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub birthdate: NaiveDate,
    pub timezone: String,
}

/// Update user payload for the service layer
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub timezone: Option<String>,
}

/// Insertable struct for creating new users in the database
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub id: DieselUlid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub birthdate: NaiveDate,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User response payload for API endpoints
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: DieselUlid,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
    #[serde(rename = "birthDate")]
    pub birthdate: NaiveDate,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(data: CreateUser) -> Self {
        let now = Utc::now();
        Self {
            id: DieselUlid::new(),
            first_name: data.first_name,
            last_name: data.last_name,
            email: data.email,
            birthdate: data.birthdate,
            timezone: data.timezone,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn to_response(&self) -> UserResponse {
        UserResponse {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            birthdate: self.birthdate,
            timezone: self.timezone.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn to_new_user(data: CreateUser) -> NewUser {
        let now = Utc::now();
        NewUser {
            id: DieselUlid::new(),
            first_name: data.first_name,
            last_name: data.last_name,
            email: data.email,
            birthdate: data.birthdate,
            timezone: data.timezone,
            created_at: now,
            updated_at: now,
        }
    }
}
