use std::path::PathBuf;

pub const DEFAULT_MPD_HOST: &str = "localhost";
pub const DEFAULT_MPD_PORT: u16 = 6600;

const APP_DIR: &str = "mpn";

/// Where and how to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpdAddress {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl MpdAddress {
    /// Resolve from `MPD_HOST` / `MPD_PORT`.
    pub fn from_env() -> Self {
        let host = std::env::var("MPD_HOST").ok();
        let port = std::env::var("MPD_PORT").ok();
        Self::parse(host.as_deref(), port.as_deref())
    }

    /// `host` is either `host` or `password@host`.
    pub fn parse(host: Option<&str>, port: Option<&str>) -> Self {
        let raw_host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_MPD_HOST);

        let (password, host) = match raw_host.split_once('@') {
            Some((password, host)) => {
                let password = Some(password.to_string()).filter(|p| !p.is_empty());
                let host = if host.is_empty() { DEFAULT_MPD_HOST } else { host };
                (password, host)
            }
            None => (None, raw_host),
        };

        let port = match port.map(str::trim).filter(|p| !p.is_empty()) {
            None => DEFAULT_MPD_PORT,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    "platform: invalid MPD_PORT '{}', using {}",
                    raw,
                    DEFAULT_MPD_PORT
                );
                DEFAULT_MPD_PORT
            }),
        };

        Self {
            host: host.to_string(),
            port,
            password,
        }
    }

    /// `host:port` for logs and for the TCP connect.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn config_dir() -> PathBuf {
    // Always ~/.config/mpn/, also on macOS
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(APP_DIR)
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join(APP_DIR)
}

pub fn cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let addr = MpdAddress::parse(None, None);
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 6600);
        assert_eq!(addr.password, None);
        assert_eq!(addr.socket_address(), "localhost:6600");
    }

    #[test]
    fn test_password_at_host() {
        let addr = MpdAddress::parse(Some("s3cret@music.lan"), Some("6601"));
        assert_eq!(addr.host, "music.lan");
        assert_eq!(addr.port, 6601);
        assert_eq!(addr.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_password_with_empty_host() {
        let addr = MpdAddress::parse(Some("pw@"), None);
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_invalid_port_uses_default() {
        let addr = MpdAddress::parse(Some("host"), Some("sixty"));
        assert_eq!(addr.port, 6600);
    }

    #[test]
    fn test_dirs_are_namespaced() {
        assert!(config_dir().ends_with(".config/mpn"));
        assert!(cache_dir().ends_with(".cache/mpn"));
    }
}
