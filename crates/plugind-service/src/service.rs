//! Plugin service and request dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use plugind_bus::ProgressPublisher;
use plugind_core::registry::PluginRegistry;
use plugind_core::{
    Config, Context, InstallOptions, InstallParams, PluginMetadata, PlugindError, Result,
    UninstallContext, WazoVersionFinder,
};
use plugind_market::{MarketDb, MarketEntry, MarketListParams, MarketProxy};
use plugind_worker::RootOps;

use crate::pipeline::{InstallPipeline, UninstallPipeline};

/// Entry point of the install and uninstall machinery.
///
/// The service validates nothing about the plugin itself: it snapshots the
/// host version, mints the request uuid, returns it, and leaves the rest
/// to the pipeline running on the bounded pool.
pub struct PluginService {
    config: Arc<Config>,
    registry: PluginRegistry,
    publisher: Arc<dyn ProgressPublisher>,
    root: Arc<dyn RootOps>,
    version_finder: WazoVersionFinder,
    pool: Arc<Semaphore>,
}

impl PluginService {
    pub fn new(
        config: Arc<Config>,
        publisher: Arc<dyn ProgressPublisher>,
        root: Arc<dyn RootOps>,
    ) -> Arc<Self> {
        let registry = PluginRegistry::new(config.clone());
        let version_finder = WazoVersionFinder::new(&config);
        let pool = Arc::new(Semaphore::new(config.worker_pool_size));
        Arc::new(Self {
            config,
            registry,
            publisher,
            root,
            version_finder,
            pool,
        })
    }

    pub(crate) fn config(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub(crate) fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub(crate) fn publisher(&self) -> &dyn ProgressPublisher {
        self.publisher.as_ref()
    }

    pub(crate) fn root(&self) -> Arc<dyn RootOps> {
        self.root.clone()
    }

    /// Accept an install request: mint its uuid, schedule its pipeline,
    /// return immediately.
    pub async fn create(
        self: &Arc<Self>,
        install_options: InstallOptions,
        install_params: InstallParams,
    ) -> Result<Uuid> {
        let wazo_version = self.version_finder.version().await?;
        let ctx = Context::new(install_options, install_params, wazo_version);
        let uuid = ctx.uuid;
        tracing::info!(
            request = %uuid,
            "installing {:?} with params {:?}...",
            ctx.install_options,
            ctx.install_params
        );
        self.spawn_install(ctx);
        Ok(uuid)
    }

    /// Accept an uninstall request for an installed plugin.
    pub async fn delete(self: &Arc<Self>, namespace: &str, name: &str) -> Result<Uuid> {
        let plugin = self.registry.get_plugin(namespace, name);
        if !plugin.is_installed(None).await {
            return Err(PlugindError::PluginNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        let ctx = UninstallContext::new(namespace, name, plugin.debian_package_name);
        let uuid = ctx.uuid;
        tracing::info!(request = %uuid, "uninstalling {namespace}/{name}...");

        let service = Arc::clone(self);
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            UninstallPipeline::new(service).execute(ctx).await;
        });
        Ok(uuid)
    }

    pub(crate) fn spawn_install(self: &Arc<Self>, ctx: Context) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            InstallPipeline::new(service.clone()).execute(ctx).await;
        })
    }

    /// Dependency pipelines run on their own task but inside the parent's
    /// pool slot: a parent waiting on its children must not starve them
    /// out of the pool.
    pub(crate) fn spawn_dependency_install(self: &Arc<Self>, ctx: Context) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            InstallPipeline::new(service.clone()).execute(ctx).await;
        })
    }

    /// Installed plugins.
    pub async fn list(&self) -> Result<Vec<PluginMetadata>> {
        self.registry.list().await
    }

    pub async fn count(&self) -> Result<usize> {
        self.registry.count().await
    }

    /// Metadata of one installed plugin.
    pub async fn get_plugin_metadata(&self, namespace: &str, name: &str) -> Result<PluginMetadata> {
        let plugin = self.registry.get_plugin(namespace, name);
        if !plugin.is_installed(None).await {
            return Err(PlugindError::PluginNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        plugin.metadata().await
    }

    /// A fresh catalog proxy for the current request.
    pub fn new_market_proxy(&self) -> Arc<MarketProxy> {
        Arc::new(MarketProxy::new(&self.config.market))
    }

    async fn market_db(&self, proxy: Arc<MarketProxy>) -> Result<MarketDb> {
        let wazo_version = self.version_finder.version().await?;
        Ok(MarketDb::new(proxy, wazo_version, self.registry.clone()))
    }

    pub async fn list_from_market(
        &self,
        proxy: Arc<MarketProxy>,
        params: &MarketListParams,
    ) -> Result<Vec<MarketEntry>> {
        self.market_db(proxy).await?.list(params).await
    }

    pub async fn count_from_market(
        &self,
        proxy: Arc<MarketProxy>,
        params: &MarketListParams,
        filtered: bool,
    ) -> Result<usize> {
        self.market_db(proxy).await?.count(params, filtered).await
    }

    pub async fn get_from_market(
        &self,
        proxy: Arc<MarketProxy>,
        namespace: &str,
        name: &str,
    ) -> Result<MarketEntry> {
        self.market_db(proxy).await?.get(namespace, name).await
    }

    /// Stop accepting pipelines and wait for the running ones.
    pub async fn drain(&self) {
        self.pool.close();
        while self.pool.available_permits() < self.config.worker_pool_size {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use plugind_bus::InMemoryPublisher;
    use plugind_core::MarketInstallOptions;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CURRENT_VERSION: &str = "17.12";

    #[derive(Default)]
    struct MockRoot {
        update_result: Option<bool>,
        install_result: Option<bool>,
        uninstall_result: Option<bool>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RootOps for MockRoot {
        async fn update(&self, _uuid: &str) -> Result<bool> {
            self.calls.lock().push("update".to_string());
            Ok(self.update_result.unwrap_or(true))
        }
        async fn install(&self, _uuid: &str, _deb: &Path) -> Result<bool> {
            self.calls.lock().push("install".to_string());
            Ok(self.install_result.unwrap_or(true))
        }
        async fn uninstall(&self, _uuid: &str, package: &str) -> Result<bool> {
            self.calls.lock().push(format!("uninstall {package}"));
            Ok(self.uninstall_result.unwrap_or(true))
        }
    }

    struct Fixture {
        _metadata_dir: TempDir,
        _market: MockServer,
        service: Arc<PluginService>,
        publisher: Arc<InMemoryPublisher>,
        root: Arc<MockRoot>,
    }

    async fn fixture(market_items: Value, installed: &[(&str, &str, &str)]) -> Fixture {
        fixture_with_root(market_items, installed, MockRoot::default()).await
    }

    async fn fixture_with_root(
        market_items: Value,
        installed: &[(&str, &str, &str)],
        root: MockRoot,
    ) -> Fixture {
        let market = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"items": market_items})),
            )
            .mount(&market)
            .await;

        let metadata_dir = TempDir::new().unwrap();
        for (namespace, name, version) in installed {
            let path = metadata_dir
                .path()
                .join(namespace)
                .join(name)
                .join("wazo/plugin.yml");
            tokio::fs::create_dir_all(path.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(
                &path,
                format!("namespace: {namespace}\nname: {name}\nversion: '{version}'\n"),
            )
            .await
            .unwrap();
        }

        let config = Arc::new(Config {
            metadata_dir: metadata_dir.path().to_path_buf(),
            wazo_version: Some(CURRENT_VERSION.to_string()),
            market: plugind_core::config::MarketConfig { url: market.uri() },
            ..Config::default()
        });
        let publisher = Arc::new(InMemoryPublisher::new());
        let root = Arc::new(root);
        let service = PluginService::new(config, publisher.clone(), root.clone());

        Fixture {
            _metadata_dir: metadata_dir,
            _market: market,
            service,
            publisher,
            root,
        }
    }

    /// Wait until the request's stream reached a terminal status.
    async fn wait_for_terminal(publisher: &InMemoryPublisher, uuid: Uuid) -> Vec<String> {
        for _ in 0..100 {
            let statuses = publisher.statuses_for(uuid);
            if matches!(statuses.last().map(String::as_str), Some("completed" | "error")) {
                return statuses;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("request {uuid} never reached a terminal status");
    }

    fn market_options(namespace: &str, name: &str) -> InstallOptions {
        InstallOptions::Market(MarketInstallOptions {
            namespace: namespace.to_string(),
            name: name.to_string(),
            version: None,
        })
    }

    #[tokio::test]
    async fn test_create_returns_a_uuid_immediately() {
        let fixture = fixture(json!([]), &[]).await;
        let uuid = fixture
            .service
            .create(market_options("foobar", "foo"), InstallParams::default())
            .await
            .unwrap();
        let statuses = wait_for_terminal(&fixture.publisher, uuid).await;
        assert_eq!(statuses.first().map(String::as_str), Some("starting"));
    }

    #[tokio::test]
    async fn test_unknown_market_plugin_fails_while_downloading() {
        let fixture = fixture(json!([]), &[]).await;
        let uuid = fixture
            .service
            .create(market_options("foobar", "foo"), InstallParams::default())
            .await
            .unwrap();

        let statuses = wait_for_terminal(&fixture.publisher, uuid).await;
        assert_eq!(statuses, vec!["starting", "downloading", "error"]);

        let events = fixture.publisher.events();
        let terminal = events
            .iter()
            .find(|e| e.uuid == uuid && e.status == "error")
            .unwrap();
        let errors = terminal.errors.as_ref().unwrap();
        assert_eq!(errors.error_id, "downloading-error");
        assert_eq!(errors.message, "Downloading Error");
        assert_eq!(
            errors.details["install_options"]["namespace"],
            "foobar"
        );
    }

    #[tokio::test]
    async fn test_already_installed_dependency_completes() {
        let fixture = fixture(
            json!([{
                "namespace": "foobar",
                "name": "foo",
                "versions": [{"version": "0.0.1", "method": "git", "options": {"url": "u"}}],
            }]),
            &[("foobar", "foo", "0.0.1")],
        )
        .await;

        let uuid = fixture
            .service
            .create(market_options("foobar", "foo"), InstallParams::default())
            .await
            .unwrap();

        let statuses = wait_for_terminal(&fixture.publisher, uuid).await;
        assert_eq!(statuses, vec!["starting", "downloading", "completed"]);
        // nothing was built or installed
        assert!(fixture.root.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_not_installed_is_rejected_synchronously() {
        let fixture = fixture(json!([]), &[]).await;
        let err = fixture
            .service
            .delete("plugindtests", "uninstalled")
            .await
            .unwrap_err();
        assert!(matches!(err, PlugindError::PluginNotFound { .. }));
        assert!(fixture.publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_delete_runs_the_uninstall_pipeline() {
        let fixture = fixture(json!([]), &[("plugindtests", "foobar", "0.0.1")]).await;
        let uuid = fixture
            .service
            .delete("plugindtests", "foobar")
            .await
            .unwrap();

        let statuses = wait_for_terminal(&fixture.publisher, uuid).await;
        assert_eq!(statuses, vec!["starting", "removing", "completed"]);
        assert_eq!(
            fixture.root.calls.lock().as_slice(),
            ["uninstall wazo-plugind-foobar-plugindtests"]
        );
    }

    #[tokio::test]
    async fn test_failed_removal_publishes_removing_error() {
        let root = MockRoot {
            uninstall_result: Some(false),
            ..MockRoot::default()
        };
        let fixture =
            fixture_with_root(json!([]), &[("plugindtests", "foobar", "0.0.1")], root).await;

        let uuid = fixture
            .service
            .delete("plugindtests", "foobar")
            .await
            .unwrap();

        let statuses = wait_for_terminal(&fixture.publisher, uuid).await;
        assert_eq!(statuses, vec!["starting", "removing", "error"]);

        let events = fixture.publisher.events();
        let terminal = events.iter().find(|e| e.status == "error").unwrap();
        assert_eq!(terminal.name, "plugin_uninstall_progress");
        let errors = terminal.errors.as_ref().unwrap();
        assert_eq!(errors.error_id, "removing-error");
    }

    #[tokio::test]
    async fn test_get_plugin_metadata() {
        let fixture = fixture(json!([]), &[("plugindtests", "foobar", "0.0.1")]).await;
        let metadata = fixture
            .service
            .get_plugin_metadata("plugindtests", "foobar")
            .await
            .unwrap();
        assert_eq!(metadata.version, "0.0.1");

        let err = fixture
            .service
            .get_plugin_metadata("plugindtests", "other")
            .await
            .unwrap_err();
        assert!(matches!(err, PlugindError::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn test_market_listing_through_the_service() {
        let fixture = fixture(
            json!([
                {"namespace": "official", "name": "admin-ui-conference", "versions": []},
                {"namespace": "official", "name": "other", "versions": []},
            ]),
            &[],
        )
        .await;

        let proxy = fixture.service.new_market_proxy();
        let params = MarketListParams {
            search: Some("conference".to_string()),
            ..MarketListParams::default()
        };
        let items = fixture
            .service
            .list_from_market(proxy.clone(), &params)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            fixture
                .service
                .count_from_market(proxy.clone(), &params, false)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            fixture
                .service
                .count_from_market(proxy, &params, true)
                .await
                .unwrap(),
            1
        );
    }
}
