use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use utoipa::ToSchema;

use crate::app::models::user::{CreateUser, UpdateUser};

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

fn check_name(field: &str, value: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(format!("{} is required", field));
    } else if value.len() > 255 {
        errors.push(format!("{} cannot exceed 255 characters", field));
    }
}

fn check_email(value: &str, errors: &mut Vec<String>) {
    if !email_regex().is_match(value) {
        errors.push("email must be a valid email address".to_string());
    }
}

fn check_timezone(value: &str, errors: &mut Vec<String>) {
    if value.parse::<Tz>().is_err() {
        errors.push(format!("timezone '{}' is not a valid IANA identifier", value));
    }
}

fn parse_birthdate(value: &str, errors: &mut Vec<String>) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => {
            if date > Utc::now().date_naive() {
                errors.push("birthDate cannot be in the future".to_string());
                None
            } else {
                Some(date)
            }
        }
        Err(_) => {
            errors.push("birthDate must be a YYYY-MM-DD date".to_string());
            None
        }
    }
}

/// Create user request payload
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateUserRequest {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
    /// YYYY-MM-DD, not in the future
    #[serde(rename = "birthDate")]
    pub birth_date: String,
    /// IANA timezone identifier
    pub timezone: String,
}

impl CreateUserRequest {
    pub fn validate(self) -> Result<CreateUser, Vec<String>> {
        let mut errors = Vec::new();

        check_name("firstName", &self.first_name, &mut errors);
        check_name("lastName", &self.last_name, &mut errors);
        check_email(&self.email, &mut errors);
        check_timezone(&self.timezone, &mut errors);
        let birthdate = parse_birthdate(&self.birth_date, &mut errors);

        match (errors.is_empty(), birthdate) {
            (true, Some(birthdate)) => Ok(CreateUser {
                first_name: self.first_name.trim().to_string(),
                last_name: self.last_name.trim().to_string(),
                email: self.email,
                birthdate,
                timezone: self.timezone,
            }),
            _ => Err(errors),
        }
    }
}

/// Update user request payload; absent fields are left unchanged
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct UpdateUserRequest {
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "birthDate")]
    pub birth_date: Option<String>,
    pub timezone: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(self) -> Result<UpdateUser, Vec<String>> {
        let mut errors = Vec::new();

        if let Some(first_name) = &self.first_name {
            check_name("firstName", first_name, &mut errors);
        }
        if let Some(last_name) = &self.last_name {
            check_name("lastName", last_name, &mut errors);
        }
        if let Some(email) = &self.email {
            check_email(email, &mut errors);
        }
        if let Some(timezone) = &self.timezone {
            check_timezone(timezone, &mut errors);
        }

        let birthdate = match &self.birth_date {
            Some(raw) => parse_birthdate(raw, &mut errors),
            None => None,
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(UpdateUser {
            first_name: self.first_name.map(|v| v.trim().to_string()),
            last_name: self.last_name.map(|v| v.trim().to_string()),
            email: self.email,
            birthdate,
            timezone: self.timezone,
        })
    }
}
