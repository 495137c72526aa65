//! Plugin tree acquisition.
//!
//! A download resolves the request's `(method, options)` to a directory on
//! disk. Git clones go straight to `<download_dir>/<uuid>`; market
//! requests select an installable version row from the catalog, rewrite
//! the context to that row's concrete source and recurse.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::process::Command;

use plugind_core::registry::PluginRegistry;
use plugind_core::{Config, Context, InstallOptions, MarketInstallOptions, PlugindError, Result};
use plugind_market::{MarketDb, MarketEntry, MarketProxy, MarketVersion};
use plugind_worker::exec_and_log;

/// Resolves install specs to local plugin trees.
pub struct Downloader {
    config: Arc<Config>,
    registry: PluginRegistry,
}

impl Downloader {
    pub fn new(config: Arc<Config>, registry: PluginRegistry) -> Self {
        Self { config, registry }
    }

    /// Download the plugin tree for this context, filling
    /// `ctx.download_path`.
    pub fn download<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &ctx.install_options {
                InstallOptions::Git(_) => self.git_download(ctx).await,
                InstallOptions::Market(_) => self.market_download(ctx).await,
            }
        })
    }

    async fn git_download(&self, ctx: &mut Context) -> Result<()> {
        let options = match &ctx.install_options {
            InstallOptions::Git(options) => options.clone(),
            _ => return Err(PlugindError::UnsupportedDownloadMethod),
        };

        let target = self.config.download_dir.join(ctx.uuid.to_string());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut command = Command::new("git");
        command
            .arg("clone")
            .arg("--branch")
            .arg(&options.git_ref)
            .arg("--depth")
            .arg("1")
            .arg(&options.url)
            .arg(&target);
        exec_and_log(&ctx.uuid.to_string(), command).await?;

        ctx.download_path = Some(target);
        Ok(())
    }

    async fn market_download(&self, ctx: &mut Context) -> Result<()> {
        let options = match &ctx.install_options {
            InstallOptions::Market(options) => options.clone(),
            _ => return Err(PlugindError::UnsupportedDownloadMethod),
        };

        let row = self.find_matching_version(ctx, &options).await?;

        let method = row.method.as_deref().unwrap_or("git");
        let row_options = row.options.clone().unwrap_or(Value::Null);
        ctx.install_options = InstallOptions::from_method(method, &row_options)?;

        self.download(ctx).await
    }

    /// Select the version row to install, or decide there is nothing to
    /// do ([`PlugindError::DependencyAlreadyInstalled`]).
    async fn find_matching_version(
        &self,
        ctx: &Context,
        options: &MarketInstallOptions,
    ) -> Result<MarketVersion> {
        let proxy = Arc::new(MarketProxy::new(&self.config.market));
        let db = MarketDb::new(proxy, ctx.wazo_version.clone(), self.registry.clone());
        let entry = db.get(&options.namespace, &options.name).await?;

        if already_satisfied(&entry, options.version.as_deref()) {
            tracing::info!(
                request = %ctx.uuid,
                "{}/{} already satisfies {:?}",
                options.namespace,
                options.name,
                options.version,
            );
            return Err(PlugindError::DependencyAlreadyInstalled);
        }

        let row = match &options.version {
            Some(required) => entry
                .versions
                .iter()
                .find(|row| row.upgradable && row.version.as_deref() == Some(required)),
            None => entry.versions.iter().find(|row| row.upgradable),
        };

        match row {
            Some(row) => Ok(row.clone()),
            None if entry.installed_version.is_some() => {
                tracing::debug!(
                    request = %ctx.uuid,
                    "ignoring dependency not upgradable: {options:?}"
                );
                Err(PlugindError::DependencyAlreadyInstalled)
            }
            None => Err(PlugindError::Internal(format!(
                "no installable version of {}/{}",
                options.namespace, options.name
            ))),
        }
    }
}

fn already_satisfied(entry: &MarketEntry, required_version: Option<&str>) -> bool {
    match (&entry.installed_version, required_version) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(installed), Some(required)) => installed == required,
    }
}
