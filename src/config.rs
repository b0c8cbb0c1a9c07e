use std::{fmt, path::PathBuf, time::Duration};

use md5::{Digest, Md5};
use url::Url;

use crate::error::{Error, Result};

/// A websocket endpoint of the content management server.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// Path that the server serves its websocket on.
    pub const DEFAULT_PATH: &'static str = "/ws";

    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: Self::DEFAULT_PATH.to_owned(),
        }
    }

    /// Returns `true` when both host and port are set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }

    /// The `ws://` URL for this endpoint.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the host does not form a valid URL.
    pub fn url(&self) -> Result<Url> {
        let url = format!("ws://{}:{}{}", self.host.trim(), self.port, self.path);
        Url::parse(&url).map_err(Into::into)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    /// Human-readable name sent on registration.
    pub device_name: String,

    /// Stable hardware identifier sent as `mac` in every client message.
    pub device_id: String,

    /// Endpoint used when no usable user configuration exists or when the
    /// user-configured endpoint failed.
    pub default_endpoint: Endpoint,

    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,

    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,

    /// Directory that preloaded content is written to.
    pub cache_dir: PathBuf,

    /// Aggregate cache size above which the whole cache is purged.
    pub cache_ceiling: u64,

    pub user_agent: String,
}

impl Config {
    pub const DEFAULT_HOST: &'static str = "192.168.2.45";
    pub const DEFAULT_PORT: u16 = 9502;

    /// Identifier used when no stable machine identifier can be found.
    pub const FALLBACK_DEVICE_ID: &'static str = "AA:BB:CC:DD:EE:FF";

    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(2);
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
    pub const CACHE_CEILING: u64 = 500 * 1024 * 1024;

    #[must_use]
    pub fn new(device_name: Option<String>, device_id: Option<String>) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let device_id = device_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(Self::machine_device_id);
        trace!("device id: {device_id}");

        let device_name = device_name
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| app_name.clone());

        let os_name = std::env::consts::OS;
        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name})");
        trace!("user agent: {user_agent}");

        let cache_dir = std::env::temp_dir().join(format!("{app_name}-cache"));

        Self {
            app_name,
            app_version,

            device_name,
            device_id,

            default_endpoint: Endpoint::new(Self::DEFAULT_HOST, Self::DEFAULT_PORT),

            heartbeat_interval: Self::HEARTBEAT_INTERVAL,
            connect_timeout: Self::CONNECT_TIMEOUT,

            reconnect_initial_delay: Self::RECONNECT_INITIAL_DELAY,
            reconnect_max_delay: Self::RECONNECT_MAX_DELAY,

            cache_dir,
            cache_ceiling: Self::CACHE_CEILING,

            user_agent,
        }
    }

    /// Derives a MAC-style identifier from the machine id, so that the server
    /// sees the same device across restarts.
    fn machine_device_id() -> String {
        match machine_uid::get() {
            Ok(machine_id) => {
                let digest = Md5::digest(machine_id.as_bytes());
                // Locally administered, unicast.
                let first = (digest[0] & 0xfc) | 0x02;
                let rest = digest[1..6].iter().map(|byte| format!("{byte:02X}"));
                std::iter::once(format!("{first:02X}"))
                    .chain(rest)
                    .collect::<Vec<_>>()
                    .join(":")
            }
            Err(e) => {
                warn!("could not get machine id, using fallback device id: {e}");
                Self::FALLBACK_DEVICE_ID.to_owned()
            }
        }
    }

    /// Checks the parts of the configuration that come from the user.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the device identifier or name is blank.
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(Error::invalid_argument("device id must not be blank"));
        }
        if self.device_name.trim().is_empty() {
            return Err(Error::invalid_argument("device name must not be blank"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url() {
        let endpoint = Endpoint::new("10.0.0.5", 9502);
        assert_eq!(endpoint.url().unwrap().as_str(), "ws://10.0.0.5:9502/ws");
    }

    #[test]
    fn incomplete_endpoints() {
        assert!(!Endpoint::new("", 9502).is_complete());
        assert!(!Endpoint::new("  ", 9502).is_complete());
        assert!(!Endpoint::new("10.0.0.5", 0).is_complete());
        assert!(Endpoint::new("10.0.0.5", 1).is_complete());
    }

    #[test]
    fn explicit_device_id_wins() {
        let config = Config::new(Some("lobby".to_owned()), Some("02:00:00:00:00:01".to_owned()));
        assert_eq!(config.device_id, "02:00:00:00:00:01");
        assert_eq!(config.device_name, "lobby");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn derived_device_id_is_mac_shaped() {
        let config = Config::new(Some("lobby".to_owned()), None);
        assert_eq!(config.device_id.len(), 17);
        assert_eq!(config.device_id.matches(':').count(), 5);
    }
}
