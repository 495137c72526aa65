//! Per-request pipeline context.

use std::path::PathBuf;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{PlugindError, Result};
use crate::metadata::{InstallOptions, InstallParams, PluginMetadata};

/// State accumulated by one install request.
///
/// The identity fields are set once by the dispatcher; the `Option` fields
/// are filled as the pipeline advances. A context is owned by the single
/// task running its pipeline, so no synchronization is needed around it.
#[derive(Debug)]
pub struct Context {
    /// Request identifier, stamped on every log line and bus event.
    pub uuid: Uuid,

    pub install_options: InstallOptions,
    pub install_params: InstallParams,

    /// Host version snapshot taken when the request was accepted.
    pub wazo_version: String,

    /// Where the plugin tree was downloaded.
    pub download_path: Option<PathBuf>,

    /// Scratch directory the plugin is built in, `<extract_dir>/<uuid>`.
    pub extract_path: Option<PathBuf>,

    /// Metadata as read from the plugin tree, before validation.
    pub raw_metadata: Option<Value>,

    /// Validated metadata.
    pub metadata: Option<PluginMetadata>,

    /// The plugin-provided rules script.
    pub installer_path: Option<PathBuf>,

    /// Root of the staged package payload.
    pub pkgdir: Option<PathBuf>,

    /// The final installable artifact.
    pub package_deb_file: Option<PathBuf>,

    /// Name of the native package being produced.
    pub package_name: Option<String>,
}

impl Context {
    /// Create a context for a new install request, minting its uuid.
    pub fn new(
        install_options: InstallOptions,
        install_params: InstallParams,
        wazo_version: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            install_options,
            install_params,
            wazo_version: wazo_version.into(),
            download_path: None,
            extract_path: None,
            raw_metadata: None,
            metadata: None,
            installer_path: None,
            pkgdir: None,
            package_deb_file: None,
            package_name: None,
        }
    }

    /// The download method currently driving this request. Market requests
    /// are rewritten to git by the downloader before cloning.
    pub fn method(&self) -> &'static str {
        self.install_options.method()
    }

    /// Validated metadata, available from the validating state onwards.
    pub fn metadata(&self) -> Result<&PluginMetadata> {
        self.metadata
            .as_ref()
            .ok_or_else(|| PlugindError::Internal("metadata is not available yet".to_string()))
    }

    /// Path accessors for stages that require an earlier stage's output.
    pub fn extract_path(&self) -> Result<&PathBuf> {
        self.extract_path
            .as_ref()
            .ok_or_else(|| PlugindError::Internal("extract path is not available yet".to_string()))
    }

    pub fn download_path(&self) -> Result<&PathBuf> {
        self.download_path
            .as_ref()
            .ok_or_else(|| PlugindError::Internal("download path is not available yet".to_string()))
    }

    pub fn installer_path(&self) -> Result<&PathBuf> {
        self.installer_path.as_ref().ok_or_else(|| {
            PlugindError::Internal("installer path is not available yet".to_string())
        })
    }

    pub fn pkgdir(&self) -> Result<&PathBuf> {
        self.pkgdir
            .as_ref()
            .ok_or_else(|| PlugindError::Internal("pkgdir is not available yet".to_string()))
    }

    pub fn package_deb_file(&self) -> Result<&PathBuf> {
        self.package_deb_file
            .as_ref()
            .ok_or_else(|| PlugindError::Internal("package file is not available yet".to_string()))
    }
}

/// State carried by one uninstall request.
#[derive(Debug, Clone)]
pub struct UninstallContext {
    pub uuid: Uuid,
    pub namespace: String,
    pub name: String,
    /// Name of the native package to remove.
    pub package_name: String,
}

impl UninstallContext {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        package_name: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            namespace: namespace.into(),
            name: name.into(),
            package_name: package_name.into(),
        }
    }
}
