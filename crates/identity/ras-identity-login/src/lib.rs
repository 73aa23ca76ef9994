//! Login orchestration for the OpenID Connect authorization code flow.
//!
//! Ties the pending-flow store, token exchange, identity token validation and
//! session manager together behind [`LoginService`], and exposes them as axum
//! routes with cookie handling.

mod cookies;
mod error;
mod routes;
mod service;
mod sweeper;


pub use cookies::CookiePolicy;
pub use error::{LoginError, LoginResult};
pub use routes::{GRAPH_ME_ENDPOINT, LoginState, RESERVED_PATHS, RouteConfig, login_router};
pub use service::{LoginRedirect, LoginService};
pub use sweeper::spawn_sweeper;

pub use ras_identity_oidc::AuthorizationResponse as CallbackParams;
