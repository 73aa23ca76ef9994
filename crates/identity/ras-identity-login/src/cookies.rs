//! Cookie policy for the flow and session identifiers.
//!
//! Both cookies carry only opaque ids. They use `SameSite=Lax` because the
//! provider's redirect back to the callback is a cross-site top-level
//! navigation, which `Strict` would strip.

use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookiePolicy {
    pub flow_cookie_name: String,
    pub session_cookie_name: String,
    /// Only disable for plain-http local development
    pub secure: bool,
    pub path: String,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            flow_cookie_name: "login_flow".to_string(),
            session_cookie_name: "session_id".to_string(),
            secure: true,
            path: "/".to_string(),
        }
    }
}

impl CookiePolicy {
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn flow_cookie(&self, flow_id: &str, ttl_seconds: u64) -> Cookie<'static> {
        self.build(&self.flow_cookie_name, flow_id.to_string(), seconds(ttl_seconds))
    }

    pub fn session_cookie(&self, session_id: &str, idle_timeout_seconds: u64) -> Cookie<'static> {
        self.build(
            &self.session_cookie_name,
            session_id.to_string(),
            seconds(idle_timeout_seconds),
        )
    }

    pub fn clear_flow_cookie(&self) -> Cookie<'static> {
        self.removal(&self.flow_cookie_name)
    }

    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        self.removal(&self.session_cookie_name)
    }

    fn build(&self, name: &str, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name.to_string(), value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path(self.path.clone())
            .max_age(max_age)
            .build()
    }

    fn removal(&self, name: &str) -> Cookie<'static> {
        self.build(name, String::new(), Duration::ZERO)
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}
