//! Bearer-token gate in front of every route.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use super::{extractors::bearer_token, jwt::JwtKeys};
use crate::{error::ApiError, state::AppState};

pub enum PathMatcher {
    Exact(&'static str),
    Pattern(Regex),
}

/// Request shape that passes without a token.
pub struct AllowRule {
    pub method: Option<Method>,
    pub path: PathMatcher,
}

impl AllowRule {
    fn exact(method: Method, path: &'static str) -> Self {
        Self {
            method: Some(method),
            path: PathMatcher::Exact(path),
        }
    }

    fn pattern(method: Method, re: &str) -> Self {
        Self {
            method: Some(method),
            path: PathMatcher::Pattern(Regex::new(re).unwrap()),
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        match &self.path {
            PathMatcher::Exact(p) => *p == path,
            PathMatcher::Pattern(re) => re.is_match(path),
        }
    }
}

lazy_static! {
    static ref ALLOW_LIST: Vec<AllowRule> = vec![
        AllowRule::exact(Method::GET, "/health"),
        AllowRule::exact(Method::POST, "/signup"),
        AllowRule::exact(Method::POST, "/login"),
        AllowRule::pattern(Method::GET, r"^/templates(/[A-Za-z0-9_-]+)?/?$"),
    ];
}

pub fn is_allowed(method: &Method, path: &str) -> bool {
    ALLOW_LIST.iter().any(|rule| rule.matches(method, path))
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_allowed(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(req.headers())?;
    let keys = JwtKeys::new(&state.config.jwt, state.config.provider.as_ref());
    let principal = keys.authenticate(token).map_err(|e| {
        warn!(error = %e, path = %req.uri().path(), "rejected token");
        ApiError::Unauthorized("Invalid or expired token".into())
    })?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_entries() {
        assert!(is_allowed(&Method::GET, "/health"));
        assert!(is_allowed(&Method::POST, "/signup"));
        assert!(is_allowed(&Method::POST, "/login"));
        assert!(!is_allowed(&Method::GET, "/login"));
        assert!(!is_allowed(&Method::POST, "/logout"));
    }

    #[test]
    fn pattern_entries() {
        assert!(is_allowed(&Method::GET, "/templates"));
        assert!(is_allowed(&Method::GET, "/templates/landing"));
        assert!(!is_allowed(&Method::POST, "/templates"));
        assert!(!is_allowed(&Method::DELETE, "/templates/landing"));
        assert!(!is_allowed(&Method::GET, "/templates/landing/files/x"));
    }

    #[test]
    fn everything_else_needs_a_token() {
        assert!(!is_allowed(&Method::GET, "/projects"));
        assert!(!is_allowed(&Method::GET, "/users"));
        assert!(!is_allowed(&Method::GET, "/admin/buckets"));
        assert!(!is_allowed(&Method::GET, "/healthz"));
    }
}
