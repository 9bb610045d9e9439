use hcen_auth::BrokerConfig;
use hcen_auth_redis::RedisPoolsConfig;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Broker settings: IdP, state, session, rate limit, cache.
    #[serde(default)]
    pub auth: BrokerConfig,
    /// Redis store pools. When disabled the broker runs on in-memory stores.
    #[serde(default)]
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Redirect URI registered at the IdP for WEB logins. Must route to
    /// `GET /auth/callback` on this server.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
    /// Where the browser lands after a successful WEB login.
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,
    #[serde(default)]
    pub cookie: CookieConfig,
    /// Use the first `X-Forwarded-For` hop as the client IP. Enable only
    /// behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_callback_url() -> String {
    "http://localhost:8080/auth/callback".into()
}
fn default_post_login_redirect() -> String {
    "/".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            callback_url: default_callback_url(),
            post_login_redirect: default_post_login_redirect(),
            cookie: CookieConfig::default(),
            trust_forwarded_for: false,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// WEB session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Mark the cookie `Secure`. Disable only for plain-http local setups.
    #[serde(default = "default_cookie_secure")]
    pub secure: bool,
}

fn default_cookie_name() -> String {
    "hcen_session".into()
}
fn default_cookie_secure() -> bool {
    true
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secure: default_cookie_secure(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub pools: RedisPoolsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        match Url::parse(&self.server.callback_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(format!(
                    "server.callback_url must be an absolute http(s) URL, got '{}'",
                    self.server.callback_url
                ));
            }
        }
        if self.server.cookie.name.is_empty() {
            return Err("server.cookie.name must not be empty".into());
        }
        self.auth.validate().map_err(|e| format!("auth: {e}"))?;
        Ok(())
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads configuration from an optional TOML file overlaid by `HCEN__*`
    /// environment variables, then validates it.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("hcen.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., HCEN__AUTH__IDP__CLIENT_ID=hcen
        builder = builder.add_source(
            Environment::with_prefix("HCEN")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
