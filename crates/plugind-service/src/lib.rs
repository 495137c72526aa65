//! Install and uninstall pipelines.
//!
//! [`PluginService`] is the entry point: it accepts requests from the HTTP
//! layer, mints their uuid, and schedules the state machines on a bounded
//! pool. Build steps run unprivileged; package operations are delegated to
//! the root worker across the privilege boundary.

pub mod builder;
pub mod debian;
pub mod download;
pub mod pipeline;
pub mod service;

pub use builder::PackageBuilder;
pub use debian::DebianGenerator;
pub use download::Downloader;
pub use service::PluginService;
