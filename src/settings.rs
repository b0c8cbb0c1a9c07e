//! Persisted settings.
//!
//! The only persisted setting the client reads is the address of the content
//! server. It lives in a TOML file:
//!
//! ```toml
//! server_ip = "10.0.0.5"
//! server_port = 9502
//! ```
//!
//! A missing file, a blank address or a zero port all mean that no address
//! was configured, and the built-in default endpoint is used instead.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{config::Endpoint, error::Result};

/// Source of the user-configured server endpoint.
pub trait SettingsStore: Send {
    /// The configured endpoint, or `None` if none is configured or it is
    /// incomplete.
    fn endpoint(&self) -> Option<Endpoint>;

    /// Re-reads the underlying storage.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the storage exists but cannot be read.
    fn reload(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct Settings {
    server_ip: Option<String>,
    server_port: Option<u16>,
}

/// Settings read from a TOML file.
#[derive(Clone, Debug)]
pub struct FileSettings {
    path: PathBuf,
    settings: Settings,
}

impl FileSettings {
    /// Reads settings from `path`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            settings: Settings::default(),
        };
        store.reload()?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn endpoint(&self) -> Option<Endpoint> {
        let host = self.settings.server_ip.as_deref()?;
        let port = self.settings.server_port?;
        Some(Endpoint::new(host.trim(), port)).filter(Endpoint::is_complete)
    }

    fn reload(&mut self) -> Result<()> {
        self.settings = match fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no settings at {}", self.path.display());
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };

        match self.endpoint() {
            Some(endpoint) => info!("configured server: {endpoint}"),
            None => debug!("no server configured in {}", self.path.display()),
        }
        Ok(())
    }
}

/// Settings held in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticSettings(pub Option<Endpoint>);

impl SettingsStore for StaticSettings {
    fn endpoint(&self) -> Option<Endpoint> {
        self.0.clone().filter(Endpoint::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(contents: &str) -> Option<Endpoint> {
        let settings: Settings = toml::from_str(contents).unwrap();
        FileSettings {
            path: PathBuf::new(),
            settings,
        }
        .endpoint()
    }

    #[test]
    fn complete_settings() {
        assert_eq!(
            from_toml("server_ip = \"10.0.0.5\"\nserver_port = 9000\n"),
            Some(Endpoint::new("10.0.0.5", 9000))
        );
    }

    #[test]
    fn incomplete_settings_are_absent() {
        assert_eq!(from_toml(""), None);
        assert_eq!(from_toml("server_ip = \"10.0.0.5\"\n"), None);
        assert_eq!(from_toml("server_ip = \"  \"\nserver_port = 9000\n"), None);
        assert_eq!(from_toml("server_ip = \"10.0.0.5\"\nserver_port = 0\n"), None);
    }

    #[test]
    fn missing_file_is_absent() {
        let store = FileSettings::open("/nonexistent/smartscreen/settings.toml").unwrap();
        assert_eq!(store.endpoint(), None);
    }
}
