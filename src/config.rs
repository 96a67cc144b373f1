use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tseries::{Location, OpenMode, StoreOptions};

pub const DEFAULT_CONFIG_FILE: &str = "temphumi.ron";
pub const ENV_PREFIX: &str = "TEMPHUMI";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config error `{0}`")]
    Config(#[from] config::ConfigError),
    #[error("config file `{0}` is not valid UTF-8")]
    BadPath(PathBuf),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemphumiConfig {
    /// SQLite file shared by the sampling loop and the server, or `:memory:`
    pub database: String,
    pub busy_timeout_ms: u64,
    pub page_size: usize,
    pub server: ServerConfig,
    pub measure: MeasureConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// served at `/` when set
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MeasureConfig {
    pub interval_s: u64,
    /// debug aid, stores random `t`/`h` values
    pub random: bool,
    /// inverter status page to scrape `p`/`e` from
    pub power_url: Option<String>,
    pub power_timeout_s: u64,
    /// echo every sample to stdout
    pub print: bool,
}

impl Default for TemphumiConfig {
    fn default() -> Self {
        Self {
            database: "measurements.sqlite".to_string(),
            busy_timeout_ms: 5000,
            page_size: 256,
            server: ServerConfig::default(),
            measure: MeasureConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            static_dir: None,
        }
    }
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            interval_s: 15 * 60,
            random: false,
            power_url: None,
            power_timeout_s: 10,
            print: true,
        }
    }
}

impl TemphumiConfig {
    /// Layers defaults, then the RON file, then `TEMPHUMI_*` env vars
    /// (`TEMPHUMI_SERVER__LISTEN=...` for nested keys).
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };
        let name = path
            .to_str()
            .ok_or_else(|| ConfigError::BadPath(path.to_path_buf()))?;

        let cfg = Config::builder()
            .add_source(File::new(name, FileFormat::Ron).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    pub fn location(&self) -> Location {
        Location::from(self.database.as_str())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            mode: OpenMode::CreateIfMissing,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{fs, path::PathBuf, time::Duration};

    use super::{ConfigError, TemphumiConfig};
    use crate::tseries::Location;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.ron");

        // an explicit path has to exist
        assert!(matches!(
            TemphumiConfig::load(Some(missing.as_path())),
            Err(ConfigError::Config(_))
        ));

        let cfg = TemphumiConfig::default();
        assert_eq!(cfg.location(), Location::File("measurements.sqlite".into()));
        assert_eq!(cfg.measure.interval_s, 900);
        assert_eq!(cfg.store_options().busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temphumi.ron");
        fs::write(
            &path,
            r#"(
    database: ":memory:",
    page_size: 64,
    server: (
        listen: "127.0.0.1:8080",
        static_dir: Some("static"),
    ),
    measure: (
        interval_s: 60,
        random: true,
    ),
)"#,
        )
        .unwrap();

        let cfg = TemphumiConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(cfg.location(), Location::Memory);
        assert_eq!(cfg.store_options().page_size, 64);
        assert_eq!(cfg.server.listen, "127.0.0.1:8080");
        assert_eq!(cfg.server.static_dir, Some(PathBuf::from("static")));
        assert_eq!(cfg.measure.interval_s, 60);
        assert!(cfg.measure.random);
        // untouched keys keep their defaults
        assert_eq!(cfg.busy_timeout_ms, 5000);
        assert_eq!(cfg.measure.power_timeout_s, 10);
        assert!(cfg.measure.print);
    }
}
