use bon::Builder;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Address used when none is configured.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7070";

/// Where the server accepts connections.
///
/// Parsed from `tcp://host:port`, `unix:///path/to.sock`, a bare `host:port`,
/// or a bare absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl Default for ListenAddr {
    fn default() -> Self {
        ListenAddr::Tcp(DEFAULT_LISTEN_ADDR.to_owned())
    }
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.contains(':') {
                return Ok(ListenAddr::Tcp(addr.to_owned()));
            }
        } else if let Some(path) = s.strip_prefix("unix://") {
            if !path.is_empty() {
                return Ok(ListenAddr::Unix(PathBuf::from(path)));
            }
        } else if s.starts_with('/') {
            return Ok(ListenAddr::Unix(PathBuf::from(s)));
        } else if s.contains(':') {
            return Ok(ListenAddr::Tcp(s.to_owned()));
        }
        Err(ConfigError::InvalidListenAddr(s.to_owned()))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Configuration for [`Server`](crate::server::Server).
///
/// ```ignore
/// let config = ServerConfig::builder()
///     .listen("unix:///tmp/linewire.sock".parse()?)
///     .max_concurrent_handlers(64)
///     .build();
/// ```
#[derive(Debug, Clone, Builder)]
pub struct ServerConfig {
    /// Address to bind.
    #[builder(default)]
    pub listen: ListenAddr,

    /// Upper bound on handlers running at once across all sessions.
    /// Unbounded when unset.
    pub max_concurrent_handlers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            "tcp://0.0.0.0:9000".parse::<ListenAddr>().unwrap(),
            ListenAddr::Tcp("0.0.0.0:9000".into())
        );
        assert_eq!(
            "localhost:7070".parse::<ListenAddr>().unwrap(),
            ListenAddr::Tcp("localhost:7070".into())
        );
        assert_eq!(
            "unix:///tmp/a.sock".parse::<ListenAddr>().unwrap(),
            ListenAddr::Unix("/tmp/a.sock".into())
        );
        assert_eq!(
            "/run/b.sock".parse::<ListenAddr>().unwrap(),
            ListenAddr::Unix("/run/b.sock".into())
        );
    }

    #[test]
    fn test_reject_bad_listen_addr() {
        for bad in ["", "nonsense", "tcp://nohost", "unix://"] {
            assert!(
                matches!(bad.parse::<ListenAddr>(), Err(ConfigError::InvalidListenAddr(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        for addr in [
            ListenAddr::Tcp("127.0.0.1:1".into()),
            ListenAddr::Unix("/tmp/x.sock".into()),
        ] {
            assert_eq!(addr.to_string().parse::<ListenAddr>().unwrap(), addr);
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, ListenAddr::Tcp(DEFAULT_LISTEN_ADDR.into()));
        assert_eq!(config.max_concurrent_handlers, None);

        let config = ServerConfig::builder().max_concurrent_handlers(8).build();
        assert_eq!(config.max_concurrent_handlers, Some(8));
    }
}
