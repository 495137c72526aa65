//! Install and uninstall state machines.
//!
//! Each pipeline runs on its own task over its own context. The progress
//! event of a state is published before the state's work starts; a
//! request therefore always emits `starting` first and exactly one of
//! `completed` or `error` last.

use std::sync::Arc;

use serde_json::{json, Value};

use plugind_bus::{ProgressError, ProgressEvent};
use plugind_core::{
    Context, InstallOptions, InstallParams, MarketInstallOptions, PlugindError,
    UninstallContext,
};

use crate::builder::PackageBuilder;
use crate::service::PluginService;

/// The ordered states of an install, after `starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstallStep {
    Downloading,
    Extracting,
    Validating,
    InstallingDependencies,
    Building,
    Packaging,
    Updating,
    Installing,
    Cleaning,
}

impl InstallStep {
    pub(crate) const ALL: [InstallStep; 9] = [
        InstallStep::Downloading,
        InstallStep::Extracting,
        InstallStep::Validating,
        InstallStep::InstallingDependencies,
        InstallStep::Building,
        InstallStep::Packaging,
        InstallStep::Updating,
        InstallStep::Installing,
        InstallStep::Cleaning,
    ];

    /// The status published when the state is entered.
    pub(crate) fn status(self) -> &'static str {
        match self {
            InstallStep::Downloading => "downloading",
            InstallStep::Extracting => "extracting",
            InstallStep::Validating => "validating",
            InstallStep::InstallingDependencies => "installing dependencies",
            InstallStep::Building => "building",
            InstallStep::Packaging => "packaging",
            InstallStep::Updating => "updating",
            InstallStep::Installing => "installing",
            InstallStep::Cleaning => "cleaning",
        }
    }

    /// Error id of an unexpected failure in this state.
    fn error_id(self) -> String {
        format!("{}-error", self.status().replace(' ', "-"))
    }

    /// Error message of an unexpected failure in this state.
    fn error_message(self) -> String {
        format!("{} Error", capitalize(self.status()))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// The install state machine.
pub(crate) struct InstallPipeline {
    service: Arc<PluginService>,
    builder: PackageBuilder,
}

impl InstallPipeline {
    pub(crate) fn new(service: Arc<PluginService>) -> Self {
        let builder = PackageBuilder::new(
            service.config(),
            service.registry().clone(),
            service.root(),
        );
        Self { service, builder }
    }

    /// Drive the context through every state, converting failures to the
    /// terminal event of the taxonomy.
    pub(crate) async fn execute(&self, mut ctx: Context) {
        self.publish(&ctx, "starting").await;

        for step in InstallStep::ALL {
            self.publish(&ctx, step.status()).await;
            if let Err(err) = self.run_step(step, &mut ctx).await {
                self.finish(&ctx, step, err).await;
                return;
            }
        }

        self.publish(&ctx, "completed").await;
    }

    async fn run_step(&self, step: InstallStep, ctx: &mut Context) -> plugind_core::Result<()> {
        match step {
            InstallStep::Downloading => self.builder.download(ctx).await,
            InstallStep::Extracting => self.builder.extract(ctx).await,
            InstallStep::Validating => self.builder.validate(ctx).await,
            InstallStep::InstallingDependencies => self.install_dependencies(ctx).await,
            InstallStep::Building => self.builder.build(ctx).await,
            InstallStep::Packaging => self.builder.package(ctx).await,
            InstallStep::Updating => self.builder.update(ctx).await,
            InstallStep::Installing => self.builder.install(ctx).await,
            InstallStep::Cleaning => self.builder.clean(ctx).await,
        }
    }

    /// Start one install pipeline per declared dependency and wait for
    /// them. Each dependency publishes its own progress stream under its
    /// own uuid; a failed dependency does not abort this pipeline, the
    /// package installation will report it if it matters.
    async fn install_dependencies(&self, ctx: &mut Context) -> plugind_core::Result<()> {
        let depends = ctx.metadata()?.depends.clone();

        let mut children = Vec::new();
        for dependency in depends {
            if !dependency.is_valid() {
                tracing::info!(
                    request = %ctx.uuid,
                    "invalid dependency {dependency:?}, skipping"
                );
                continue;
            }

            tracing::info!(
                request = %ctx.uuid,
                "installing dependency {}/{}",
                dependency.namespace,
                dependency.name
            );
            let child = Context::new(
                InstallOptions::Market(MarketInstallOptions::from(&dependency)),
                InstallParams::default(),
                ctx.wazo_version.clone(),
            );
            children.push(self.service.spawn_dependency_install(child));
        }

        for child in children {
            let _ = child.await;
        }
        Ok(())
    }

    /// Terminal handling: already-installed outcomes become `completed`,
    /// everything else becomes `error`. The scratch directory is removed
    /// before the terminal event goes out.
    async fn finish(&self, ctx: &Context, step: InstallStep, err: PlugindError) {
        match err {
            PlugindError::CommandExecutionFailed { .. } => {
                tracing::info!(
                    request = %ctx.uuid,
                    "an external command failed during the plugin installation: {err}"
                );
                self.builder.cleanup_quietly(ctx).await;
                let error = ProgressError::new(
                    "install-error",
                    "Installation error",
                    json!({"step": step.status()}),
                );
                self.publish_error(ctx, error).await;
            }
            PlugindError::PluginAlreadyInstalled { namespace, name } => {
                tracing::info!(request = %ctx.uuid, "{namespace}/{name} is already installed");
                self.builder.cleanup_quietly(ctx).await;
                self.publish(ctx, "completed").await;
            }
            PlugindError::DependencyAlreadyInstalled => {
                self.builder.cleanup_quietly(ctx).await;
                self.publish(ctx, "completed").await;
            }
            PlugindError::Validation { details } => {
                tracing::info!(request = %ctx.uuid, "plugin validation error: {details:?}");
                self.builder.cleanup_quietly(ctx).await;
                let mut details = details;
                details.insert(
                    "install_options".to_string(),
                    ctx.install_options.as_value(),
                );
                let error = ProgressError::new(
                    "validation-error",
                    "Validation error",
                    Value::Object(details),
                );
                self.publish_error(ctx, error).await;
            }
            err => {
                tracing::error!(
                    request = %ctx.uuid,
                    "unexpected error while {}: {err}",
                    step.status()
                );
                self.builder.cleanup_quietly(ctx).await;
                let error = ProgressError::new(
                    step.error_id(),
                    step.error_message(),
                    json!({"install_options": ctx.install_options.as_value()}),
                );
                self.publish_error(ctx, error).await;
            }
        }
    }

    async fn publish(&self, ctx: &Context, status: &str) {
        let event = ProgressEvent::install(ctx.uuid, status);
        if let Err(e) = self.service.publisher().publish(event).await {
            tracing::warn!(request = %ctx.uuid, "failed to publish {status}: {e}");
        }
    }

    async fn publish_error(&self, ctx: &Context, error: ProgressError) {
        let event = ProgressEvent::install_error(ctx.uuid, error);
        if let Err(e) = self.service.publisher().publish(event).await {
            tracing::warn!(request = %ctx.uuid, "failed to publish error event: {e}");
        }
    }
}

/// The uninstall state machine: `starting` then `removing` then
/// `completed`.
pub(crate) struct UninstallPipeline {
    service: Arc<PluginService>,
}

impl UninstallPipeline {
    pub(crate) fn new(service: Arc<PluginService>) -> Self {
        Self { service }
    }

    pub(crate) async fn execute(&self, ctx: UninstallContext) {
        self.publish(&ctx, "starting").await;
        self.publish(&ctx, "removing").await;

        match self.remove(&ctx).await {
            Ok(()) => self.publish(&ctx, "completed").await,
            Err(err) => {
                tracing::error!(request = %ctx.uuid, "unexpected error while removing: {err}");
                let error = ProgressError::new("removing-error", "Removing Error", json!({}));
                let event = ProgressEvent::uninstall_error(ctx.uuid, error);
                if let Err(e) = self.service.publisher().publish(event).await {
                    tracing::warn!(request = %ctx.uuid, "failed to publish error event: {e}");
                }
            }
        }
    }

    async fn remove(&self, ctx: &UninstallContext) -> plugind_core::Result<()> {
        let removed = self
            .service
            .root()
            .uninstall(&ctx.uuid.to_string(), &ctx.package_name)
            .await?;
        if !removed {
            return Err(PlugindError::Internal("Uninstallation failed".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, ctx: &UninstallContext, status: &str) {
        let event = ProgressEvent::uninstall(ctx.uuid, status);
        if let Err(e) = self.service.publisher().publish(event).await {
            tracing::warn!(request = %ctx.uuid, "failed to publish {status}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_ids() {
        assert_eq!(InstallStep::Downloading.error_id(), "downloading-error");
        assert_eq!(
            InstallStep::InstallingDependencies.error_id(),
            "installing-dependencies-error"
        );
    }

    #[test]
    fn test_step_error_messages() {
        assert_eq!(InstallStep::Building.error_message(), "Building Error");
        assert_eq!(
            InstallStep::InstallingDependencies.error_message(),
            "Installing dependencies Error"
        );
    }

    #[test]
    fn test_state_order() {
        let statuses: Vec<&str> = InstallStep::ALL.iter().map(|s| s.status()).collect();
        assert_eq!(
            statuses,
            vec![
                "downloading",
                "extracting",
                "validating",
                "installing dependencies",
                "building",
                "packaging",
                "updating",
                "installing",
                "cleaning",
            ]
        );
    }
}
