//! Installed plugin registry.
//!
//! A plugin counts as installed when its native package sits in the
//! reserved dpkg section and its metadata file is readable under the
//! metadata directory. Nothing is cached across requests: every query
//! re-reads the host state.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::config::Config;
use crate::dpkg::{self, PackageDb};
use crate::error::{PlugindError, Result};
use crate::metadata::PluginMetadata;

/// Read-only registry of installed plugins.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    config: Arc<Config>,
    package_db: PackageDb,
}

impl PluginRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            package_db: PackageDb::new(),
        }
    }

    /// Metadata of every installed plugin.
    ///
    /// A package of the reserved section whose metadata file is missing or
    /// unreadable is logged and skipped, never fatal.
    pub async fn list(&self) -> Result<Vec<PluginMetadata>> {
        let packages = self
            .package_db
            .list_installed_packages(&self.config.debian_package_section)
            .await?;

        let mut result = Vec::new();
        for package in packages {
            let (namespace, name) =
                match dpkg::parse_package_name(&self.config.debian_package_prefix, &package) {
                    Ok(identity) => identity,
                    Err(_) => {
                        tracing::info!("ignoring unexpected package name {package}");
                        continue;
                    }
                };

            let plugin = self.get_plugin(&namespace, &name);
            match plugin.metadata().await {
                Ok(metadata) => result.push(metadata),
                Err(_) => {
                    tracing::info!("no metadata file found for {namespace}/{name}");
                }
            }
        }
        Ok(result)
    }

    /// Number of installed plugins.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    /// A lazy handle over one plugin's installed state.
    pub fn get_plugin(&self, namespace: &str, name: &str) -> InstalledPlugin {
        InstalledPlugin::new(&self.config, namespace, name)
    }

    /// Whether `(namespace, name)` is installed; with a `version`, requires
    /// exact equality with the installed metadata's version.
    pub async fn is_installed(&self, namespace: &str, name: &str, version: Option<&str>) -> bool {
        self.get_plugin(namespace, name).is_installed(version).await
    }
}

/// Handle over one plugin, reading its metadata on first access.
#[derive(Debug)]
pub struct InstalledPlugin {
    pub namespace: String,
    pub name: String,
    /// The native package owning this plugin's files.
    pub debian_package_name: String,
    metadata_filename: PathBuf,
    cached: OnceLock<PluginMetadata>,
}

impl InstalledPlugin {
    fn new(config: &Config, namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            debian_package_name: config.debian_package_name(namespace, name),
            metadata_filename: config.installed_metadata_path(namespace, name),
            cached: OnceLock::new(),
        }
    }

    /// Read and parse the installed metadata file.
    pub async fn metadata(&self) -> Result<PluginMetadata> {
        if let Some(metadata) = self.cached.get() {
            return Ok(metadata.clone());
        }

        let content = tokio::fs::read_to_string(&self.metadata_filename).await?;
        let metadata: PluginMetadata = serde_yaml::from_str(&content).map_err(|e| {
            PlugindError::Metadata(format!(
                "unreadable metadata at {}: {e}",
                self.metadata_filename.display()
            ))
        })?;
        let _ = self.cached.set(metadata.clone());
        Ok(metadata)
    }

    /// Whether the plugin is installed, optionally at an exact version.
    pub async fn is_installed(&self, version: Option<&str>) -> bool {
        match self.metadata().await {
            Ok(metadata) => match version {
                Some(version) => metadata.version == version,
                None => true,
            },
            Err(_) => false,
        }
    }
}
