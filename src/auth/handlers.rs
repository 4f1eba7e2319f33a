use axum::{
    extract::{FromRef, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use super::{
    dto::{AuthResponse, LoginRequest, SignupRequest},
    extractors::{AuthUser, Principal},
    jwt::JwtKeys,
    password::{hash_password, verify_password},
    sessions::Session,
};
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    users::{dto::PublicUser, repo_types::User},
    validate,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/me/sessions", get(my_sessions))
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
}

async fn issue_token(state: &AppState, user: &User, headers: &HeaderMap) -> ApiResult<String> {
    let session = Session::start(&state.db, user.id, user_agent(headers)).await?;
    JwtKeys::from_ref(state)
        .sign(user.id, Some(session.id))
        .map_err(|e| {
            error!(error = %e, "jwt sign failed");
            ApiError::Internal(e)
        })
}

#[instrument(skip(state, headers, payload))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();

    validate::username(&payload.username)?;
    validate::email(&payload.email)?;
    validate::password(&payload.password)?;

    if User::find_by_username(&state.db, &payload.username).await?.is_some() {
        warn!(username = %payload.username, "username already taken");
        return Err(ApiError::Conflict("Username already taken".into()));
    }
    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let hash = hash_password(&payload.password).map_err(ApiError::Internal)?;
    let user = User::create(&state.db, &payload.username, &payload.email, &hash).await?;
    let token = issue_token(&state, &user, &headers).await?;

    info!(user_id = %user.id, username = %user.username, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let login = payload.login.trim();
    if login.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation("Login and password are required".into()));
    }

    let user = match User::find_by_login(&state.db, login).await? {
        Some(u) => u,
        None => {
            warn!(login = %login, "login unknown user");
            return Err(ApiError::Unauthorized("Invalid credentials".into()));
        }
    };

    let ok = verify_password(&payload.password, &user.password_hash).map_err(|e| {
        error!(error = %e, user_id = %user.id, "stored hash unreadable");
        ApiError::Internal(e)
    })?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let token = issue_token(&state, &user, &headers).await?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>, principal: Principal) -> ApiResult<StatusCode> {
    if let (Some(user_id), Some(session_id)) = (principal.user_id(), principal.session_id()) {
        let ended = Session::end(&state.db, session_id, user_id).await?;
        info!(%user_id, %session_id, ended, "user logged out");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<PublicUser>> {
    let user = User::find_by_id(&state.db, user_id).await?.ok_or_else(|| {
        error!(%user_id, "token for missing user");
        ApiError::Unauthorized("User not found".into())
    })?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn my_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(Session::list_for_user(&state.db, user_id).await?))
}
