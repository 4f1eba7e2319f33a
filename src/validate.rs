//! Input checks shared by the handlers. Each returns `ApiError::Validation`
//! with a message meant for the client.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ApiError, ApiResult};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    // Project names end up in bucket names, so they follow DNS label rules.
    static ref PROJECT_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{1,38}[A-Za-z0-9]$").unwrap();
    static ref SLUG_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn email(email: &str) -> ApiResult<()> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(ApiError::Validation("Invalid email".into()))
    }
}

pub fn username(name: &str) -> ApiResult<()> {
    if USERNAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "Username must be 3-32 letters, digits, '.', '_' or '-'".into(),
        ))
    }
}

pub fn password(password: &str) -> ApiResult<()> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(ApiError::Validation("Password too short".into()))
    }
}

pub fn project_name(name: &str) -> ApiResult<()> {
    if PROJECT_RE.is_match(name) && !name.contains("--") {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "Project name must be 3-40 letters, digits or single hyphens".into(),
        ))
    }
}

/// Group and template names.
pub fn slug(kind: &str, name: &str) -> ApiResult<()> {
    if SLUG_RE.is_match(name) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("Invalid {kind} name")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(is_valid_email("a@b.io"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.io"));
    }

    #[test]
    fn usernames() {
        assert!(username("jane.doe").is_ok());
        assert!(username("jd").is_err());
        assert!(username("jane doe").is_err());
    }

    #[test]
    fn passwords() {
        assert!(password("12345678").is_ok());
        assert!(password("1234567").is_err());
    }

    #[test]
    fn project_names() {
        assert!(project_name("my-site").is_ok());
        assert!(project_name("MySite2").is_ok());
        assert!(project_name("-site").is_err());
        assert!(project_name("site-").is_err());
        assert!(project_name("my--site").is_err());
        assert!(project_name("my_site").is_err());
        assert!(project_name("ab").is_err());
        assert!(project_name(&"a".repeat(41)).is_err());
    }

    #[test]
    fn slugs() {
        assert!(slug("group", "editors").is_ok());
        assert!(slug("group", "team_a-1").is_ok());
        assert!(slug("group", "").is_err());
        assert!(slug("template", "has space").is_err());
    }
}
