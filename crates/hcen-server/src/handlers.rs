//! HTTP handlers for the authentication endpoints.
//!
//! - `GET  /auth/login` - WEB initiation, redirects to the IdP
//! - `POST /auth/mobile/login` - MOBILE initiation with a PKCE challenge
//! - `GET  /auth/callback` - WEB callback, sets the session cookie
//! - `POST /auth/mobile/callback` - MOBILE callback, returns the session token
//! - `GET  /auth/session` - session introspection (Bearer or cookie)
//! - `POST /auth/session/refresh` - sliding refresh
//! - `POST /auth/logout` - session invalidation
//! - `GET  /health` - store pool reachability

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{FromRequest, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use hcen_auth::broker::SessionGrant;
use hcen_auth::crypto::pkce::PkceChallengeMethod;
use hcen_auth::exchange::CallbackRequest;
use hcen_auth::session::Session;
use hcen_auth::state::ClientType;
use hcen_auth::AuthError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::server::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn session_cookie(state: &AppState, grant: &SessionGrant) -> Cookie<'static> {
    let remaining = grant.session.remaining();
    Cookie::build((state.server.cookie.name.clone(), grant.token.clone()))
        .http_only(true)
        .secure(state.server.cookie.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(
            i64::try_from(remaining.as_secs()).unwrap_or(i64::MAX),
        ))
        .build()
}

fn removal_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build(state.server.cookie.name.clone()).path("/").build()
}

/// Where a session token was presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenSource {
    Bearer,
    Cookie,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Bearer header first, then the session cookie.
fn session_token(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<(String, TokenSource), AuthError> {
    if let Some(token) = bearer_token(headers) {
        return Ok((token, TokenSource::Bearer));
    }
    jar.get(&state.server.cookie.name)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .map(|t| (t, TokenSource::Cookie))
        .ok_or_else(|| AuthError::invalid_token("missing session token"))
}

// ---------------------------------------------------------------------------
// Initiation
// ---------------------------------------------------------------------------

pub async fn web_login(State(state): State<AppState>) -> ApiResult<Response> {
    let request = state
        .broker
        .begin_authorization(ClientType::Web, &state.server.callback_url, None)
        .await?;
    Ok(found(request.authorization_url.as_str()))
}

/// JSON request body whose rejections use the API error body.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileLoginRequest {
    pub redirect_uri: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileLoginResponse {
    pub authorization_url: String,
    pub state: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

pub async fn mobile_login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<MobileLoginRequest>,
) -> ApiResult<Json<MobileLoginResponse>> {
    if let Some(method) = &body.code_challenge_method {
        PkceChallengeMethod::parse(method)?;
    }

    let request = state
        .broker
        .begin_authorization(
            ClientType::Mobile,
            &body.redirect_uri,
            body.code_challenge.as_deref(),
        )
        .await?;

    Ok(Json(MobileLoginResponse {
        authorization_url: request.authorization_url.to_string(),
        state: request.state,
        expires_at: request.expires_at,
    }))
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct WebCallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

pub async fn web_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<WebCallbackParams>,
) -> ApiResult<(CookieJar, Response)> {
    let state_token = params
        .state
        .ok_or_else(|| AuthError::invalid_state("missing state"))?;

    if let Some(error) = params.error {
        let err = state
            .broker
            .reject_authorization(&state_token, &error, params.error_description)
            .await;
        return Err(err.into());
    }

    let login = state
        .broker
        .complete_authorization(CallbackRequest::web(
            params.code.unwrap_or_default(),
            state_token,
            state.server.callback_url.clone(),
        ))
        .await?;

    let jar = jar.add(session_cookie(&state, &login.grant));
    Ok((jar, found(&state.server.post_login_redirect)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileCallbackRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub redirect_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub subject: String,
}

impl From<SessionGrant> for TokenResponse {
    fn from(grant: SessionGrant) -> Self {
        Self {
            token: grant.token,
            expires_at: grant.session.expires_at,
            subject: grant.session.subject_id,
        }
    }
}

pub async fn mobile_callback(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<MobileCallbackRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let login = state
        .broker
        .complete_authorization(CallbackRequest::mobile(
            body.code,
            body.state,
            body.redirect_uri,
            body.code_verifier,
        ))
        .await?;
    Ok(Json(login.grant.into()))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub subject: String,
    pub client_type: ClientType,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub attributes: BTreeMap<String, String>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            subject: session.subject_id,
            client_type: session.client_type,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            attributes: session.attributes,
        }
    }
}

pub async fn session_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<SessionView>> {
    let (token, _) = session_token(&state, &headers, &jar)?;
    let session = state.broker.authenticate(&token).await?;
    Ok(Json(session.into()))
}

pub async fn refresh_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<TokenResponse>)> {
    let (token, source) = session_token(&state, &headers, &jar)?;
    let grant = state.broker.refresh(&token).await?;

    let jar = match source {
        TokenSource::Cookie => jar.add(session_cookie(&state, &grant)),
        TokenSource::Bearer => jar,
    };
    Ok((jar, Json(grant.into())))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<(CookieJar, StatusCode)> {
    let (token, _) = session_token(&state, &headers, &jar)?;
    state.broker.logout(&token).await?;
    Ok((jar.remove(removal_cookie(&state)), StatusCode::NO_CONTENT))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.broker.health().await;
    let (status, label) = if report.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "pools": report.pools,
        })),
    )
        .into_response()
}
