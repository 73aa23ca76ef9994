//! axum routes for the login flow.

use crate::cookies::CookiePolicy;
use crate::error::LoginError;
use crate::service::LoginService;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use ras_identity_oidc::AuthorizationResponse;
use std::sync::Arc;
use tracing::{debug, info};

/// Default resource called by `/me`
pub const GRAPH_ME_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/me";

#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Path of the redirect URI registered with the provider
    pub callback_path: String,
    /// Where the browser lands after signing in
    pub landing_path: String,
    pub resource_endpoint: String,
    pub cookies: CookiePolicy,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            callback_path: "/getAToken".to_string(),
            landing_path: "/hello".to_string(),
            resource_endpoint: GRAPH_ME_ENDPOINT.to_string(),
            cookies: CookiePolicy::default(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct LoginState {
    pub service: Arc<LoginService>,
    pub config: Arc<RouteConfig>,
}

pub fn login_router(service: Arc<LoginService>, config: RouteConfig) -> Router {
    let callback_path = normalize_path(&config.callback_path);
    let state = LoginState {
        service,
        config: Arc::new(config),
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/login", get(login_handler))
        .route(&callback_path, get(callback_handler))
        .route("/me", get(me_handler))
        .route("/hello", get(hello_handler))
        .route("/logout", get(logout_handler))
        .with_state(state)
}

/// Paths handled by the router itself, unavailable as a callback path
pub const RESERVED_PATHS: &[&str] = &["/", "/login", "/me", "/hello", "/logout"];

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn session_id(jar: &CookieJar, state: &LoginState) -> Option<String> {
    jar.get(&state.config.cookies.session_cookie_name)
        .map(|cookie| cookie.value().to_string())
}

/// Reissue the session cookie so its `Max-Age` runs from the latest activity,
/// matching the server-side idle timeout.
fn extend_session_cookie(jar: CookieJar, state: &LoginState, session_id: &str) -> CookieJar {
    let idle_timeout = state.service.sessions().config().idle_timeout_seconds;
    jar.add(state.config.cookies.session_cookie(session_id, idle_timeout))
}

async fn index_handler(State(state): State<LoginState>, jar: CookieJar) -> Response {
    let session_id = session_id(&jar, &state);

    match state.service.current_session(session_id.as_deref()).await {
        Ok(session) => {
            let body = Json(serde_json::json!({
                "signed_in": true,
                "name": session.claims.display_name,
                "preferred_username": session.claims.preferred_username,
            }));
            (extend_session_cookie(jar, &state, &session.session_id), body).into_response()
        }
        Err(e) if e.requires_login() => {
            Json(serde_json::json!({ "signed_in": false })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn login_handler(State(state): State<LoginState>, jar: CookieJar) -> Response {
    match state.service.start_login().await {
        Ok(redirect) => {
            let cookie = state
                .config
                .cookies
                .flow_cookie(&redirect.flow_id, state.service.flow_ttl_seconds());
            (jar.add(cookie), Redirect::to(redirect.authorization_url.as_str())).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn callback_handler(
    State(state): State<LoginState>,
    jar: CookieJar,
    Query(params): Query<AuthorizationResponse>,
) -> Response {
    let cookies = &state.config.cookies;
    let flow_id = jar
        .get(&cookies.flow_cookie_name)
        .map(|cookie| cookie.value().to_string());
    let jar = jar.remove(cookies.clear_flow_cookie());

    match state.service.complete_login(flow_id.as_deref(), params).await {
        Ok(session) => {
            let jar = extend_session_cookie(jar, &state, &session.session_id);
            (jar, Redirect::to(&state.config.landing_path)).into_response()
        }
        Err(e) if e.restarts_login() => {
            debug!("Callback without a matching pending flow, restarting login");
            (jar, Redirect::to("/login")).into_response()
        }
        Err(e) => (jar, e).into_response(),
    }
}

async fn me_handler(State(state): State<LoginState>, jar: CookieJar) -> Response {
    let session_id = session_id(&jar, &state);

    match state
        .service
        .call_resource_api(session_id.as_deref(), &state.config.resource_endpoint)
        .await
    {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .content_type
                .unwrap_or_else(|| "application/json".to_string());
            let jar = match session_id.as_deref() {
                Some(session_id) => extend_session_cookie(jar, &state, session_id),
                None => jar,
            };
            (
                status,
                jar,
                [(header::CONTENT_TYPE, content_type)],
                upstream.body,
            )
                .into_response()
        }
        Err(e) => login_or_error(e),
    }
}

async fn hello_handler(State(state): State<LoginState>, jar: CookieJar) -> Response {
    let session_id = session_id(&jar, &state);

    match state.service.current_session(session_id.as_deref()).await {
        Ok(session) => {
            let jar = extend_session_cookie(jar, &state, &session.session_id);
            (jar, Json(session.claims)).into_response()
        }
        Err(e) => login_or_error(e),
    }
}

async fn logout_handler(State(state): State<LoginState>, jar: CookieJar) -> Response {
    let session_id = session_id(&jar, &state);
    let jar = jar.remove(state.config.cookies.clear_session_cookie());

    match state.service.logout(session_id.as_deref()).await {
        Ok(Some(logout_url)) => {
            info!("Signed out, redirecting to provider");
            (jar, Redirect::to(logout_url.as_str())).into_response()
        }
        Ok(None) => (jar, Redirect::to("/")).into_response(),
        Err(e) => (jar, e).into_response(),
    }
}

fn login_or_error(err: LoginError) -> Response {
    if err.requires_login() {
        Redirect::to("/login").into_response()
    } else {
        err.into_response()
    }
}
