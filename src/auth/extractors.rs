use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::error::ApiError;

/// Caller attached to a request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of a token we issued.
    Local {
        user_id: Uuid,
        session_id: Option<Uuid>,
    },
    /// Holder of a third-party provider token.
    External {
        subject: String,
        email: Option<String>,
    },
}

impl Principal {
    /// Local account behind the caller. Provider subjects map to an account
    /// only when they are account ids.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::Local { user_id, .. } => Some(*user_id),
            Principal::External { subject, .. } => Uuid::parse_str(subject).ok(),
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Principal::Local { session_id, .. } => *session_id,
            Principal::External { .. } => None,
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header".into()))
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }
        // Routes outside the middleware verify the header themselves.
        let token = bearer_token(&parts.headers)?;
        JwtKeys::from_ref(state).authenticate(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            ApiError::Unauthorized("Invalid or expired token".into())
        })
    }
}

/// Id of the local account making the request.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        principal
            .user_id()
            .map(AuthUser)
            .ok_or_else(|| ApiError::Forbidden("A local account is required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");
        assert!(bearer_token(&headers("Basic abc")).is_err());
        assert!(bearer_token(&headers("Bearer ")).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn external_subject_maps_to_account_only_when_uuid() {
        let id = Uuid::new_v4();
        let linked = Principal::External {
            subject: id.to_string(),
            email: None,
        };
        assert_eq!(linked.user_id(), Some(id));
        let unlinked = Principal::External {
            subject: "github|42".into(),
            email: None,
        };
        assert_eq!(unlinked.user_id(), None);
        assert_eq!(unlinked.session_id(), None);
    }
}
