use std::time::Duration;

pub const ONENET_PROPERTY_POST_URL: &str =
    "https://www.onenet.hk.chinamobile.com:20080/fuse/http/device/thing/property/post";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_host: String,
    pub port: u16,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    /// When false, a TLS failure is retried once without certificate checks.
    pub strict_tls: bool,
    pub static_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            upstream_url: ONENET_PROPERTY_POST_URL.to_string(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            strict_tls: true,
            static_dir: "public".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_host = lookup("ONENET_BIND_HOST").unwrap_or(defaults.bind_host);
        let port = lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let strict_tls = lookup("ONENET_STRICT_TLS")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.strict_tls);
        let static_dir = lookup("ONENET_STATIC_DIR").unwrap_or(defaults.static_dir);

        Self {
            bind_host,
            port,
            strict_tls,
            static_dir,
            ..defaults
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
