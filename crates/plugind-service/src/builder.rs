//! Package build stages.
//!
//! Every stage takes the request context, performs its work as the
//! daemon's unprivileged owner, and records its outputs on the context.
//! The privileged operations (index refresh, install) are requested from
//! the root worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;

use plugind_core::registry::PluginRegistry;
use plugind_core::{Config, Context, InstallOptions, MetadataValidator, PlugindError, Result};
use plugind_worker::{exec_and_log, RootOps};

use crate::debian::DebianGenerator;
use crate::download::Downloader;

/// Turns a downloaded plugin tree into an installed native package.
pub struct PackageBuilder {
    config: Arc<Config>,
    registry: PluginRegistry,
    downloader: Downloader,
    root: Arc<dyn RootOps>,
}

impl PackageBuilder {
    pub fn new(config: Arc<Config>, registry: PluginRegistry, root: Arc<dyn RootOps>) -> Self {
        let downloader = Downloader::new(config.clone(), registry.clone());
        Self {
            config,
            registry,
            downloader,
            root,
        }
    }

    pub async fn download(&self, ctx: &mut Context) -> Result<()> {
        self.downloader.download(ctx).await
    }

    /// Move the downloaded tree into the request's scratch directory and
    /// read its metadata file.
    pub async fn extract(&self, ctx: &mut Context) -> Result<()> {
        let extract_path = self.config.extract_dir.join(ctx.uuid.to_string());
        tracing::debug!(request = %ctx.uuid, "extracting to {}", extract_path.display());

        let _ = tokio::fs::remove_dir_all(&extract_path).await;
        if let Some(parent) = extract_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut download_path = ctx.download_path()?.clone();
        if let InstallOptions::Git(options) = &ctx.install_options {
            if let Some(subdirectory) = &options.subdirectory {
                download_path = download_path.join(subdirectory);
            }
        }
        tokio::fs::rename(&download_path, &extract_path).await?;

        let metadata_file = extract_path.join(&self.config.metadata_filename);
        let content = tokio::fs::read_to_string(&metadata_file).await?;
        let document: serde_yaml::Value = serde_yaml::from_str(&content)?;
        let raw = serde_json::to_value(document)?;

        ctx.extract_path = Some(extract_path);
        ctx.raw_metadata = Some(raw);
        Ok(())
    }

    /// Validate the metadata read by [`PackageBuilder::extract`] against
    /// the schema and the host version.
    pub async fn validate(&self, ctx: &mut Context) -> Result<()> {
        let raw = ctx
            .raw_metadata
            .clone()
            .ok_or_else(|| PlugindError::Internal("metadata has not been read".to_string()))?;

        let validator = MetadataValidator::new(self.registry.clone(), &ctx.wazo_version);
        let metadata = validator.validate(&raw, &ctx.install_params).await?;
        ctx.package_name = Some(
            self.config
                .debian_package_name(&metadata.namespace, &metadata.name),
        );
        ctx.metadata = Some(metadata);
        // reinstall only applies to the requested plugin itself
        ctx.install_params.reinstall = false;
        Ok(())
    }

    /// Run the plugin's build step as the unprivileged owner.
    pub async fn build(&self, ctx: &mut Context) -> Result<()> {
        let extract_path = ctx.extract_path()?.clone();
        let metadata = ctx.metadata()?;
        tracing::debug!(
            request = %ctx.uuid,
            "building {}/{}",
            metadata.namespace,
            metadata.name
        );

        let installer_path = extract_path.join(&self.config.install_filename);
        let mut command = Command::new(&installer_path);
        command.arg("build").current_dir(&extract_path);
        exec_and_log(&ctx.uuid.to_string(), command).await?;

        ctx.installer_path = Some(installer_path);
        Ok(())
    }

    /// Stage the payload under fakeroot and debianize it.
    pub async fn package(&self, ctx: &mut Context) -> Result<()> {
        let extract_path = ctx.extract_path()?.clone();
        let metadata = ctx.metadata()?.clone();
        tracing::debug!(
            request = %ctx.uuid,
            "packaging {}/{}",
            metadata.namespace,
            metadata.name
        );

        let pkgdir = extract_path.join(&self.config.build_dir);
        tokio::fs::create_dir_all(&pkgdir).await?;

        let mut command = Command::new("fakeroot");
        command
            .arg(ctx.installer_path()?)
            .arg("package")
            .current_dir(&extract_path)
            .env("pkgdir", &pkgdir);
        exec_and_log(&ctx.uuid.to_string(), command).await?;

        let data_destination = pkgdir
            .join(staging_relative(&self.config.metadata_dir))
            .join(&metadata.namespace)
            .join(&metadata.name);
        tokio::fs::create_dir_all(&data_destination).await?;

        let data_source = extract_path.join(&self.config.plugin_data_dir);
        let mut command = Command::new("fakeroot");
        command
            .arg("cp")
            .arg("-R")
            .arg(&data_source)
            .arg(&data_destination)
            .current_dir(&extract_path);
        exec_and_log(&ctx.uuid.to_string(), command).await?;

        ctx.pkgdir = Some(pkgdir);
        self.debianize(ctx).await
    }

    async fn debianize(&self, ctx: &mut Context) -> Result<()> {
        let extract_path = ctx.extract_path()?.clone();
        let generator = DebianGenerator::from_config(self.config.clone())?;
        generator.generate(ctx).await?;

        let mut command = Command::new("dpkg-deb");
        command
            .arg("--build")
            .arg(ctx.pkgdir()?)
            .current_dir(&extract_path);
        exec_and_log(&ctx.uuid.to_string(), command).await?;

        ctx.package_deb_file = Some(extract_path.join(format!("{}.deb", self.config.build_dir)));
        Ok(())
    }

    /// Refresh the package index when the plugin declares native
    /// dependencies.
    pub async fn update(&self, ctx: &Context) -> Result<()> {
        if ctx.metadata()?.debian_depends.is_empty() {
            return Ok(());
        }

        if !self.root.update(&ctx.uuid.to_string()).await? {
            return Err(PlugindError::Internal("apt-get update failed".to_string()));
        }
        Ok(())
    }

    /// Install the produced artifact through the root worker.
    pub async fn install(&self, ctx: &Context) -> Result<()> {
        let deb = ctx.package_deb_file()?;
        if !self.root.install(&ctx.uuid.to_string(), deb).await? {
            return Err(PlugindError::Internal("Installation failed".to_string()));
        }
        Ok(())
    }

    /// Remove the request's scratch directory.
    pub async fn clean(&self, ctx: &Context) -> Result<()> {
        if let Some(extract_path) = &ctx.extract_path {
            tracing::debug!(
                request = %ctx.uuid,
                "removing build directory {}",
                extract_path.display()
            );
            tokio::fs::remove_dir_all(extract_path).await?;
        }
        Ok(())
    }

    /// Best-effort cleanup on the failure paths: every non-completed exit
    /// removes the scratch directory before its terminal event is emitted.
    pub async fn cleanup_quietly(&self, ctx: &Context) {
        if let Some(extract_path) = &ctx.extract_path {
            match tokio::fs::remove_dir_all(extract_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    request = %ctx.uuid,
                    "failed to remove {}: {e}",
                    extract_path.display()
                ),
            }
        }
    }
}

/// A filesystem root made relative so it can be staged under `pkgdir`.
fn staging_relative(path: &Path) -> PathBuf {
    path.strip_prefix("/").unwrap_or(path).to_path_buf()
}
