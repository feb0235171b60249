use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use thiserror::Error;

use crate::database::DbPool;
use crate::schema::users;
use crate::app::models::user::{CreateUser, UpdateUser, User};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user {0} not found")]
    NotFound(String),
    #[error("email {0} is already registered")]
    EmailTaken(String),
}

/// Recipient store. The delivery engine only reads from here; writes come in
/// through the user CRUD endpoints and emit lifecycle events after commit.
pub struct UserService;

impl UserService {
    pub fn create_user(pool: &DbPool, data: CreateUser) -> Result<User> {
        let mut conn = pool.get()?;

        if Self::find_live_by_email(pool, &data.email)?.is_some() {
            return Err(UserError::EmailTaken(data.email).into());
        }

        let new_user = User::to_new_user(data);

        let user = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_select())
            .get_result::<User>(&mut conn)?;

        Ok(user)
    }

    /// Look up by id including soft-deleted rows. The delivery worker uses
    /// this to observe `deleted_at` at dispatch time.
    pub fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<User>> {
        let mut conn = pool.get()?;

        let result = users::table
            .filter(users::id.eq(id))
            .select(User::as_select())
            .first::<User>(&mut conn)
            .optional()?;

        Ok(result)
    }

    pub fn find_live_by_id(pool: &DbPool, id: &str) -> Result<Option<User>> {
        let mut conn = pool.get()?;

        let result = users::table
            .filter(users::id.eq(id))
            .filter(users::deleted_at.is_null())
            .select(User::as_select())
            .first::<User>(&mut conn)
            .optional()?;

        Ok(result)
    }

    pub fn find_live_by_email(pool: &DbPool, email: &str) -> Result<Option<User>> {
        let mut conn = pool.get()?;

        let result = users::table
            .filter(users::email.eq(email))
            .filter(users::deleted_at.is_null())
            .select(User::as_select())
            .first::<User>(&mut conn)
            .optional()?;

        Ok(result)
    }

    pub fn find_all_live(pool: &DbPool) -> Result<Vec<User>> {
        let mut conn = pool.get()?;

        let result = users::table
            .filter(users::deleted_at.is_null())
            .order(users::created_at.asc())
            .select(User::as_select())
            .load::<User>(&mut conn)?;

        Ok(result)
    }

    pub fn update_user(pool: &DbPool, id: &str, data: UpdateUser) -> Result<User> {
        let mut conn = pool.get()?;

        if let Some(new_email) = &data.email {
            if let Some(holder) = Self::find_live_by_email(pool, new_email)? {
                if holder.id.to_string() != id {
                    return Err(UserError::EmailTaken(new_email.clone()).into());
                }
            }
        }

        let updated = diesel::update(
            users::table
                .filter(users::id.eq(id))
                .filter(users::deleted_at.is_null()),
        )
        .set((
            data.first_name.map(|v| users::first_name.eq(v)),
            data.last_name.map(|v| users::last_name.eq(v)),
            data.email.map(|v| users::email.eq(v)),
            data.birthdate.map(|v| users::birthdate.eq(v)),
            data.timezone.map(|v| users::timezone.eq(v)),
            users::updated_at.eq(Utc::now()),
        ))
        .returning(User::as_select())
        .get_result::<User>(&mut conn)
        .optional()?;

        updated.ok_or_else(|| UserError::NotFound(id.to_string()).into())
    }

    pub fn soft_delete(pool: &DbPool, id: &str) -> Result<User> {
        let mut conn = pool.get()?;
        let now = Utc::now();

        let deleted = diesel::update(
            users::table
                .filter(users::id.eq(id))
                .filter(users::deleted_at.is_null()),
        )
        .set((
            users::deleted_at.eq(Some(now)),
            users::updated_at.eq(now),
        ))
        .returning(User::as_select())
        .get_result::<User>(&mut conn)
        .optional()?;

        deleted.ok_or_else(|| UserError::NotFound(id.to_string()).into())
    }
}
