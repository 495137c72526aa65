//! Daemon configuration.
//!
//! Configuration is layered: compiled-in defaults, then an optional YAML
//! file, then `WAZO_PLUGIND_*` environment variables. The resulting value is
//! immutable for the lifetime of the daemon and shared behind an `Arc`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Maximum `plugin_format_version` this daemon understands.
pub const MAX_PLUGIN_FORMAT_VERSION: u32 = 2;

const DEFAULT_HTTP_PORT: u16 = 9503;

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory of the daemon.
    pub home_dir: PathBuf,

    /// Where git clones land, partitioned by request uuid.
    pub download_dir: PathBuf,

    /// Scratch space for builds, partitioned by request uuid.
    pub extract_dir: PathBuf,

    /// Root of installed plugin metadata (`<metadata_dir>/<ns>/<name>/...`).
    pub metadata_dir: PathBuf,

    /// Directory holding the debian maintainer-script templates.
    pub template_dir: PathBuf,

    /// Where rules scripts are backed up for use by postrm.
    pub backup_rules_dir: PathBuf,

    /// Name of the staging directory created inside the extract path.
    pub build_dir: String,

    /// Name of the plugin data directory inside a plugin tree.
    pub plugin_data_dir: String,

    /// Path of the metadata file relative to a plugin tree.
    pub metadata_filename: String,

    /// Path of the install (rules) script relative to a plugin tree.
    pub install_filename: String,

    /// Prefix of the native packages produced by the builder.
    pub debian_package_prefix: String,

    /// Reserved dpkg section identifying plugin packages.
    pub debian_package_section: String,

    /// Template file names, resolved inside `template_dir`.
    pub control_template: String,
    pub postinst_template: String,
    pub prerm_template: String,
    pub postrm_template: String,

    /// Size of the pipeline worker pool.
    pub worker_pool_size: usize,

    pub debug: bool,
    pub log_level: String,

    /// Unprivileged account the daemon drops to after forking the root
    /// worker. `None` keeps the current user (tests, dev runs).
    pub user: Option<String>,

    /// Static host version override. When unset the version is discovered
    /// through `WAZO_VERSION` or the configuration service.
    pub wazo_version: Option<String>,

    /// Identifier of this service instance, stamped on bus messages.
    pub uuid: Option<String>,

    pub rest_api: RestApiConfig,
    pub bus: BusConfig,
    pub market: MarketConfig,
    pub auth: AuthConfig,
    pub confd: ConfdConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = PathBuf::from("/usr/lib/wazo-plugind");
        Self {
            download_dir: PathBuf::from("/var/lib/wazo-plugind/downloads"),
            extract_dir: PathBuf::from("/var/lib/wazo-plugind/tmp"),
            metadata_dir: home_dir.join("plugins"),
            template_dir: home_dir.join("templates"),
            backup_rules_dir: PathBuf::from("/var/lib/wazo-plugind/rules"),
            home_dir,
            build_dir: "_pkg".to_string(),
            plugin_data_dir: "wazo".to_string(),
            metadata_filename: "wazo/plugin.yml".to_string(),
            install_filename: "wazo/rules".to_string(),
            debian_package_prefix: "wazo-plugind".to_string(),
            debian_package_section: "wazo-plugind-plugin".to_string(),
            control_template: "control.tera".to_string(),
            postinst_template: "postinst.tera".to_string(),
            prerm_template: "prerm.tera".to_string(),
            postrm_template: "postrm.tera".to_string(),
            worker_pool_size: 10,
            debug: false,
            log_level: "info".to_string(),
            user: Some("wazo-plugind".to_string()),
            wazo_version: None,
            uuid: None,
            rest_api: RestApiConfig::default(),
            bus: BusConfig::default(),
            market: MarketConfig::default(),
            auth: AuthConfig::default(),
            confd: ConfdConfig::default(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestApiConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// AMQP broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub exchange_name: String,
    pub exchange_type: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            username: "guest".to_string(),
            password: "guest".to_string(),
            host: "localhost".to_string(),
            port: 5672,
            exchange_name: "wazo-headers".to_string(),
            exchange_type: "headers".to_string(),
        }
    }
}

impl BusConfig {
    /// AMQP URI for this broker.
    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Market catalog service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub url: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            url: "https://apps.wazo.community/api/v2".to_string(),
        }
    }
}

/// Identity service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9497/0.1".to_string(),
            username: None,
            password: None,
            key_file: PathBuf::from("/var/lib/wazo-auth-keys/wazo-plugind-key.yml"),
        }
    }
}

/// Configuration service used for host version discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfdConfig {
    pub url: String,
}

impl Default for ConfdConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9486/1.1".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration: defaults, then the YAML file at `path` when
    /// it exists, then `WAZO_PLUGIND_*` environment variables
    /// (`WAZO_PLUGIND_REST_API__PORT=9504` style nesting).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = serde_yaml::to_string(&Config::default())
            .map_err(|e| crate::error::PlugindError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults,
            config::FileFormat::Yaml,
        ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("WAZO_PLUGIND").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Derived debian package name for a plugin identity.
    pub fn debian_package_name(&self, namespace: &str, name: &str) -> String {
        format!("{}-{}-{}", self.debian_package_prefix, name, namespace)
    }

    /// Absolute path of an installed plugin's metadata file.
    pub fn installed_metadata_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.metadata_dir
            .join(namespace)
            .join(name)
            .join(&self.metadata_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.build_dir, "_pkg");
        assert_eq!(config.metadata_filename, "wazo/plugin.yml");
        assert_eq!(config.debian_package_section, "wazo-plugind-plugin");
        assert_eq!(config.worker_pool_size, 10);
        assert_eq!(config.rest_api.port, 9503);
        assert_eq!(config.bus.exchange_name, "wazo-headers");
    }

    #[test]
    fn test_debian_package_name() {
        let config = Config::default();
        assert_eq!(
            config.debian_package_name("official", "admin-ui-conference"),
            "wazo-plugind-admin-ui-conference-official"
        );
    }

    #[test]
    fn test_installed_metadata_path() {
        let config = Config::default();
        assert_eq!(
            config.installed_metadata_path("plugindtests", "foobar"),
            PathBuf::from("/usr/lib/wazo-plugind/plugins/plugindtests/foobar/wazo/plugin.yml")
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".yml")
            .tempfile()
            .unwrap();
        writeln!(file, "build_dir: _stage\nrest_api:\n  port: 9600").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.build_dir, "_stage");
        assert_eq!(config.rest_api.port, 9600);
        // untouched values keep their defaults
        assert_eq!(config.plugin_data_dir, "wazo");
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.yml"))).unwrap();
        assert_eq!(config.build_dir, "_pkg");
    }
}
