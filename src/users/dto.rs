use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;

/// Public part of a user returned to clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    /// Only shown to the user themselves and to admins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: Some(u.email),
            is_admin: u.is_admin,
            created_at: u.created_at,
        }
    }
}

impl PublicUser {
    /// `user` as seen by `viewer`.
    pub fn for_viewer(user: User, viewer: &User) -> Self {
        let visible = viewer.id == user.id || viewer.is_admin;
        let mut public = Self::from(user);
        if !visible {
            public.email = None;
        }
        public
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Pagination {
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 200), self.offset.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "jane".into(),
            email: "jane@example.com".into(),
            password_hash: "$argon2id$v=19$secret-hash".into(),
            is_admin: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = user();
        let raw = serde_json::to_string(&user).unwrap();
        assert!(!raw.contains("password"));
        assert!(!raw.contains("secret-hash"));

        let public = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(!public.contains("password"));
        assert!(public.contains("jane@example.com"));
    }

    #[test]
    fn email_is_hidden_from_other_users() {
        let jane = user();
        let bob = User {
            id: Uuid::new_v4(),
            username: "bob".into(),
            email: "bob@example.com".into(),
            ..jane.clone()
        };
        let admin = User {
            id: Uuid::new_v4(),
            is_admin: true,
            ..bob.clone()
        };

        let seen_by_bob = PublicUser::for_viewer(jane.clone(), &bob);
        assert_eq!(seen_by_bob.email, None);
        let raw = serde_json::to_string(&seen_by_bob).unwrap();
        assert!(!raw.contains("email"));

        assert_eq!(
            PublicUser::for_viewer(jane.clone(), &jane).email.as_deref(),
            Some("jane@example.com")
        );
        assert_eq!(
            PublicUser::for_viewer(jane, &admin).email.as_deref(),
            Some("jane@example.com")
        );
    }

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination { limit: 10_000, offset: -3 };
        assert_eq!(p.clamped(), (200, 0));
    }
}
