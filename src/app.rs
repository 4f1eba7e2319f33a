use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{admin, auth, groups, projects, templates, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(projects::router())
        .merge(groups::routes())
        .merge(templates::router())
        .merge(admin::router())
        .route("/health", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub fn listen_addr() -> anyhow::Result<SocketAddr> {
    let addr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;
    Ok(addr)
}

pub async fn serve(
    app: Router,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::jwt::JwtKeys,
        state::{seed_user, MemoryStorage},
    };

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn local_token(state: &AppState) -> String {
        let keys = JwtKeys::new(&state.config.jwt, state.config.provider.as_ref());
        keys.sign(Uuid::new_v4(), None).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(request(Method::GET, "/health", None, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn projects_need_a_token() {
        let app = build_app(AppState::fake());
        let res = app
            .clone()
            .oneshot(request(Method::GET, "/projects", None, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .oneshot(request(Method::GET, "/projects", Some("not-a-jwt"), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_is_allow_listed() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(request(
                Method::POST,
                "/login",
                None,
                Some(r#"{"login":"","password":""}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signup_rejects_bad_email() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(request(
                Method::POST,
                "/signup",
                None,
                Some(r#"{"username":"jane","email":"nope","password":"long-enough"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn template_upload_needs_a_token() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(request(Method::POST, "/templates", None, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_project_name_is_rejected() {
        let state = AppState::fake();
        let token = local_token(&state);
        let app = build_app(state);
        let res = app
            .oneshot(request(
                Method::POST,
                "/projects",
                Some(&token),
                Some(r#"{"name":"bad--name"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn project_lifecycle_over_http(pool: sqlx::PgPool) {
        let storage = std::sync::Arc::new(MemoryStorage::default());
        let state = AppState::with_db(pool, storage.clone(), Default::default());
        let owner = seed_user(&state.db, "jane").await;
        let keys = JwtKeys::new(&state.config.jwt, state.config.provider.as_ref());
        let token = keys.sign(owner.id, None).unwrap();
        let app = build_app(state);
        let body = Some(r#"{"name":"my-site"}"#);

        let res = app
            .clone()
            .oneshot(request(Method::POST, "/projects", Some(&token), body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers()[header::LOCATION], "/projects/my-site");
        assert!(storage.has_bucket("test-my-site"));

        let res = app
            .clone()
            .oneshot(request(Method::POST, "/apps", Some(&token), body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .clone()
            .oneshot(request(Method::DELETE, "/projects/my-site", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(!storage.has_bucket("test-my-site"));

        let res = app
            .oneshot(request(Method::GET, "/projects/my-site", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
