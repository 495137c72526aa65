//! Core domain types for wazo-plugind.
//!
//! Everything the install and uninstall pipelines share lives here: the
//! daemon configuration, the error taxonomy, the per-request context, the
//! loose version comparator used by the market catalog, the plugin metadata
//! model with its validator, and the installed-plugin registry.

pub mod config;
pub mod context;
pub mod dpkg;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod validator;
pub mod version;
pub mod wazo_version;

pub use config::Config;
pub use context::{Context, UninstallContext};
pub use error::{PlugindError, Result};
pub use metadata::{
    DependencyEntry, GitInstallOptions, InstallOptions, InstallParams, MarketInstallOptions,
    PluginMetadata,
};
pub use registry::{InstalledPlugin, PluginRegistry};
pub use validator::MetadataValidator;
pub use wazo_version::WazoVersionFinder;
