//! Configuration for the Entra login server
//!
//! Sources, lowest precedence first:
//! - Defaults
//! - Configuration file (login.toml, or LOGIN_CONFIG_FILE)
//! - Environment variables with the LOGIN prefix, e.g. LOGIN__SERVER__PORT
//! - The Azure sample variables AZURE_CLIENT_ID, AZURE_TENANT_ID,
//!   AZURE_CLIENT_SECRET and REDIRECT_PATH
//!
//! The tenant may be given as its GUID or as one of its domain names
//! (contoso.onmicrosoft.com). The multi-tenant authorities `common`,
//! `organizations` and `consumers` are not supported.

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use ras_identity_login::{CookiePolicy, GRAPH_ME_ENDPOINT, RESERVED_PATHS, RouteConfig};
use ras_identity_oidc::{ClientCredentials, OidcConfig};
use ras_identity_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tracing::{debug, info};

/// Crates whose logs follow `logging.level`; everything else logs warnings
const LOGGED_CRATES: [&str; 4] = [
    "entra_login_server",
    "ras_identity_login",
    "ras_identity_oidc",
    "ras_identity_session",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderSettings,
    pub timeouts: TimeoutConfig,
    pub session: SessionSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: IpAddr,

    /// Port to bind to (default: 5000)
    pub port: u16,

    /// Externally visible origin, used to build the redirect URI
    pub public_url: String,
}

/// Where the provider's discovery document is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    /// The document must name exactly this issuer
    Issuer(String),
    /// The document's issuer only has to share the authority's origin
    Authority(String),
}

impl DiscoveryTarget {
    pub fn url(&self) -> &str {
        match self {
            DiscoveryTarget::Issuer(url) | DiscoveryTarget::Authority(url) => url,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Entra tenant GUID or domain; the provider is discovered through it
    /// unless `issuer` is set
    pub tenant_id: Option<String>,

    /// Any OpenID provider's issuer, overriding the tenant
    pub issuer: Option<String>,

    pub client_id: String,

    /// Never defaulted
    pub client_secret: String,

    /// Callback path registered with the provider (default: /getAToken)
    pub redirect_path: String,

    pub scopes: Vec<String>,

    /// Protected resource proxied by /me
    pub resource_endpoint: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("tenant_id", &self.tenant_id)
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_path", &self.redirect_path)
            .field("scopes", &self.scopes)
            .field("resource_endpoint", &self.resource_endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub flow_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    pub clock_skew_seconds: u64,
    pub jwks_refresh_seconds: u64,
    pub jwks_min_refresh_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Idle timeout in seconds (default: 86400 = 24 hours)
    pub idle_timeout_seconds: u64,

    /// Only disable for plain-http local development
    pub cookie_secure: bool,

    /// How often expired flows and idle sessions are swept
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or a full filter string
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 5000,
            public_url: "http://localhost:5000".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            tenant_id: None,
            issuer: None,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_path: "/getAToken".to_string(),
            scopes: vec!["User.Read".to_string()],
            resource_endpoint: GRAPH_ME_ENDPOINT.to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let oidc = OidcConfig::default();
        Self {
            flow_ttl_seconds: oidc.flow_ttl_seconds,
            http_timeout_seconds: oidc.http_timeout_seconds,
            clock_skew_seconds: oidc.clock_skew_seconds,
            jwks_refresh_seconds: oidc.jwks_refresh_seconds,
            jwks_min_refresh_interval_seconds: oidc.jwks_min_refresh_interval_seconds,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: SessionConfig::default().idle_timeout_seconds,
            cookie_secure: true,
            sweep_interval_seconds: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment and optional config file
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("LOGIN_CONFIG_FILE").unwrap_or_else(|_| "login.toml".to_string());

        Self::load_from(Path::new(&config_path), |name| std::env::var(name).ok())
    }

    /// Load from an explicit file, resolving the Azure variables through `lookup`
    pub fn load_from(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No config file found at {}, using defaults", path.display());
        }

        builder = builder.add_source(
            Environment::with_prefix("LOGIN")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("provider.scopes")
                .try_parsing(true),
        );

        let mut settings: Config = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.apply_env_overrides(lookup);
        settings.validate()?;

        Ok(settings)
    }

    /// Variable names used by the Azure Flask sample
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup("AZURE_CLIENT_ID") {
            info!("Using AZURE_CLIENT_ID environment variable");
            self.provider.client_id = client_id;
        }

        if let Some(tenant_id) = lookup("AZURE_TENANT_ID") {
            info!("Using AZURE_TENANT_ID environment variable");
            self.provider.tenant_id = Some(tenant_id);
        }

        if let Some(client_secret) = lookup("AZURE_CLIENT_SECRET") {
            info!("Using AZURE_CLIENT_SECRET environment variable");
            self.provider.client_secret = client_secret;
        }

        if let Some(redirect_path) = lookup("REDIRECT_PATH") {
            info!("Using REDIRECT_PATH environment variable");
            self.provider.redirect_path = redirect_path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if !self.server.public_url.starts_with("http://")
            && !self.server.public_url.starts_with("https://")
        {
            anyhow::bail!(
                "Public URL '{}' must be an absolute http(s) URL",
                self.server.public_url
            );
        }

        if self.provider.client_id.trim().is_empty() {
            anyhow::bail!("Client id is required (provider.client_id or AZURE_CLIENT_ID)");
        }

        if self.provider.client_secret.trim().is_empty() {
            anyhow::bail!(
                "Client secret is required (provider.client_secret or AZURE_CLIENT_SECRET)"
            );
        }

        if self.provider.issuer.is_none() && self.provider.tenant_id.is_none() {
            anyhow::bail!("Either provider.issuer or a tenant id must be configured");
        }

        let redirect_path = self.provider.redirect_path.as_str();
        if !redirect_path.starts_with('/') {
            anyhow::bail!("Redirect path '{}' must start with '/'", redirect_path);
        }
        if RESERVED_PATHS.contains(&redirect_path) {
            anyhow::bail!(
                "Redirect path '{}' collides with a built-in route; choose another",
                redirect_path
            );
        }

        if self.session.idle_timeout_seconds == 0 {
            anyhow::bail!("Session idle timeout must be positive");
        }

        if self.session.sweep_interval_seconds == 0 {
            anyhow::bail!("Sweep interval must be positive");
        }

        let valid_formats = ["pretty", "compact"];
        let format_lower = self.logging.format.to_lowercase();
        if !valid_formats.contains(&format_lower.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            );
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.server.host, self.server.port))
    }

    /// Explicit issuer, or the Entra v2.0 authority of the tenant
    pub fn discovery_target(&self) -> Option<DiscoveryTarget> {
        if let Some(issuer) = &self.provider.issuer {
            return Some(DiscoveryTarget::Issuer(issuer.clone()));
        }
        self.provider.tenant_id.as_ref().map(|tenant| {
            DiscoveryTarget::Authority(format!("https://login.microsoftonline.com/{}/v2.0", tenant))
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.server.public_url.trim_end_matches('/'),
            self.provider.redirect_path
        )
    }

    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.provider.client_id.clone(),
            client_secret: self.provider.client_secret.clone(),
        }
    }

    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig::new()
            .with_flow_ttl(self.timeouts.flow_ttl_seconds)
            .with_http_timeout(self.timeouts.http_timeout_seconds)
            .with_clock_skew(self.timeouts.clock_skew_seconds)
            .with_jwks_refresh(self.timeouts.jwks_refresh_seconds)
            .with_jwks_min_refresh_interval(self.timeouts.jwks_min_refresh_interval_seconds)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_idle_timeout(self.session.idle_timeout_seconds)
    }

    pub fn route_config(&self) -> RouteConfig {
        RouteConfig {
            callback_path: self.provider.redirect_path.clone(),
            resource_endpoint: self.provider.resource_endpoint.clone(),
            cookies: CookiePolicy::default().with_secure(self.session.cookie_secure),
            ..RouteConfig::default()
        }
    }

    /// Get the log filter string for tracing
    pub fn log_filter(&self) -> String {
        if self.logging.level.contains('=') || self.logging.level.contains(',') {
            self.logging.level.clone()
        } else {
            let mut directives: Vec<String> = LOGGED_CRATES
                .iter()
                .map(|target| format!("{}={}", target, self.logging.level))
                .collect();
            directives.push("warn".to_string());
            directives.join(",")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.provider.client_id = "client-123".to_string();
        config.provider.client_secret = "secret".to_string();
        config.provider.tenant_id = Some("tenant-1".to_string());
        config
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config_needs_credentials() {
        assert!(Config::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_secret_fails() {
        let mut config = valid_config();
        config.provider.client_secret = "  ".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Client secret"));
    }

    #[test]
    fn test_reserved_redirect_path_fails() {
        for path in ["/login", "/me", "/", "getAToken"] {
            let mut config = valid_config();
            config.provider.redirect_path = path.to_string();
            assert!(config.validate().is_err(), "{} should be rejected", path);
        }
    }

    #[test]
    fn test_discovery_target_from_tenant() {
        let mut config = valid_config();
        assert_eq!(
            config.discovery_target(),
            Some(DiscoveryTarget::Authority(
                "https://login.microsoftonline.com/tenant-1/v2.0".to_string()
            ))
        );

        config.provider.tenant_id = Some("contoso.onmicrosoft.com".to_string());
        assert_eq!(
            config.discovery_target().as_ref().map(DiscoveryTarget::url),
            Some("https://login.microsoftonline.com/contoso.onmicrosoft.com/v2.0")
        );

        config.provider.issuer = Some("https://accounts.example.com".to_string());
        assert_eq!(
            config.discovery_target(),
            Some(DiscoveryTarget::Issuer("https://accounts.example.com".to_string()))
        );
    }

    #[test]
    fn test_redirect_uri() {
        let mut config = valid_config();
        config.server.public_url = "https://app.example.com/".to_string();
        assert_eq!(config.redirect_uri(), "https://app.example.com/getAToken");
    }

    #[test]
    fn test_azure_variables_override_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8080

[provider]
client_id = "from-file"
client_secret = "file-secret"
tenant_id = "file-tenant"

[session]
cookie_secure = false
"#
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("AZURE_CLIENT_ID", "from-env"),
            ("REDIRECT_PATH", "/auth/callback"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::load_from(file.path(), |name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.provider.client_id, "from-env");
        assert_eq!(config.provider.client_secret, "file-secret");
        assert_eq!(config.provider.redirect_path, "/auth/callback");
        assert_eq!(config.provider.scopes, vec!["User.Read".to_string()]);
        assert!(!config.route_config().cookies.secure);
        assert_eq!(config.route_config().callback_path, "/auth/callback");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let result = Config::load_from(Path::new("/nonexistent/login.toml"), no_env);

        // Defaults carry no credentials
        assert!(result.is_err());
    }

    #[test]
    fn test_log_filter() {
        let mut config = valid_config();
        assert!(config.log_filter().starts_with("entra_login_server=info"));

        config.logging.level = "debug,hyper=warn".to_string();
        assert_eq!(config.log_filter(), "debug,hyper=warn");
    }

    #[test]
    fn test_oidc_config_mapping() {
        let mut config = valid_config();
        config.timeouts.flow_ttl_seconds = 120;

        let oidc = config.oidc_config();
        assert_eq!(oidc.flow_ttl_seconds, 120);
        assert_eq!(oidc.clock_skew_seconds, 300);
        assert_eq!(config.session_config().idle_timeout_seconds, 86_400);
    }
}
