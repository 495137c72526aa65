//! Debian control and maintainer-script generation.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tera::Tera;

use plugind_core::{Config, Context, PluginMetadata, PlugindError, Result};

const DEBIAN_DIR: &str = "DEBIAN";
const SCRIPT_MODE: u32 = 0o755;

/// Renders the `DEBIAN/` directory of a staged package.
pub struct DebianGenerator {
    tera: Tera,
    config: Arc<Config>,
}

impl DebianGenerator {
    /// Load the templates from the configured template directory.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let glob = format!("{}/*", config.template_dir.display());
        let tera = Tera::new(&glob)
            .map_err(|e| PlugindError::Internal(format!("cannot load templates: {e}")))?;
        Ok(Self { tera, config })
    }

    /// Render control, postinst, prerm and postrm into
    /// `<pkgdir>/DEBIAN/`. Maintainer scripts are marked executable.
    pub async fn generate(&self, ctx: &Context) -> Result<()> {
        let metadata = ctx.metadata()?;
        let debian_dir = ctx.pkgdir()?.join(DEBIAN_DIR);
        tokio::fs::create_dir(&debian_dir).await?;

        let context = self.template_context(metadata)?;
        let files = [
            ("control", &self.config.control_template, false),
            ("postinst", &self.config.postinst_template, true),
            ("prerm", &self.config.prerm_template, true),
            ("postrm", &self.config.postrm_template, true),
        ];

        for (filename, template, executable) in files {
            let content = self
                .tera
                .render(template, &context)
                .map_err(|e| PlugindError::Internal(format!("cannot render {template}: {e}")))?;
            let path = debian_dir.join(filename);
            tracing::debug!(request = %ctx.uuid, "generated {}\n{content}", path.display());
            tokio::fs::write(&path, content).await?;

            if executable {
                tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(SCRIPT_MODE))
                    .await?;
            }
        }
        Ok(())
    }

    fn template_context(&self, metadata: &PluginMetadata) -> Result<tera::Context> {
        let mut document = match serde_json::to_value(metadata)? {
            Value::Object(map) => map,
            _ => return Err(PlugindError::Internal("unexpected metadata shape".to_string())),
        };

        document.insert(
            "debian_depends".to_string(),
            json!(self.derived_debian_depends(metadata)),
        );
        document.insert(
            "debian_package_name".to_string(),
            Value::String(
                self.config
                    .debian_package_name(&metadata.namespace, &metadata.name),
            ),
        );
        document.insert(
            "debian_package_section".to_string(),
            Value::String(self.config.debian_package_section.clone()),
        );
        document.insert(
            "rules_path".to_string(),
            path_string(
                self.config
                    .metadata_dir
                    .join(&metadata.namespace)
                    .join(&metadata.name)
                    .join(&self.config.install_filename),
            ),
        );
        document.insert(
            "backup_rules_path".to_string(),
            path_string(
                self.config
                    .backup_rules_dir
                    .join(format!("rules.{}.{}", metadata.name, metadata.namespace)),
            ),
        );

        tera::Context::from_value(Value::Object(document))
            .map_err(|e| PlugindError::Internal(format!("cannot build template context: {e}")))
    }

    /// The declared native dependencies plus the package of every plugin
    /// dependency.
    fn derived_debian_depends(&self, metadata: &PluginMetadata) -> Vec<String> {
        let mut depends = metadata.debian_depends.clone();
        for dependency in &metadata.depends {
            depends.push(
                self.config
                    .debian_package_name(&dependency.namespace, &dependency.name),
            );
        }
        depends
    }
}

fn path_string(path: PathBuf) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugind_core::{DependencyEntry, GitInstallOptions, InstallOptions, InstallParams};
    use tempfile::TempDir;

    const CONTROL: &str = "\
Package: {{ debian_package_name }}
Version: {{ version }}
Section: {{ debian_package_section }}
{% if debian_depends %}Depends: {{ debian_depends | join(sep=\", \") }}
{% endif %}Description: {{ namespace }}/{{ name }}
";
    const POSTINST: &str = "#!/bin/sh\n{{ rules_path }} postinst\n";
    const PRERM: &str = "#!/bin/sh\n{{ rules_path }} prerm\n";
    const POSTRM: &str = "#!/bin/sh\n{{ backup_rules_path }} postrm\n";

    async fn generator_fixture() -> (TempDir, TempDir, DebianGenerator) {
        let templates = TempDir::new().unwrap();
        tokio::fs::write(templates.path().join("control.tera"), CONTROL)
            .await
            .unwrap();
        tokio::fs::write(templates.path().join("postinst.tera"), POSTINST)
            .await
            .unwrap();
        tokio::fs::write(templates.path().join("prerm.tera"), PRERM)
            .await
            .unwrap();
        tokio::fs::write(templates.path().join("postrm.tera"), POSTRM)
            .await
            .unwrap();

        let pkgdir = TempDir::new().unwrap();
        let config = Arc::new(Config {
            template_dir: templates.path().to_path_buf(),
            ..Config::default()
        });
        let generator = DebianGenerator::from_config(config).unwrap();
        (templates, pkgdir, generator)
    }

    fn context_with_metadata(pkgdir: &TempDir, metadata: PluginMetadata) -> Context {
        let mut ctx = Context::new(
            InstallOptions::Git(GitInstallOptions {
                url: "file:///data/git/repo".to_string(),
                git_ref: "master".to_string(),
                subdirectory: None,
            }),
            InstallParams::default(),
            "17.12",
        );
        ctx.metadata = Some(metadata);
        ctx.pkgdir = Some(pkgdir.path().to_path_buf());
        ctx
    }

    fn metadata() -> PluginMetadata {
        PluginMetadata {
            namespace: "plugindtests".to_string(),
            name: "foobar".to_string(),
            version: "0.0.1".to_string(),
            plugin_format_version: 0,
            min_wazo_version: None,
            max_wazo_version: None,
            depends: vec![DependencyEntry {
                namespace: "official".to_string(),
                name: "admin-ui-conference".to_string(),
                version: None,
            }],
            debian_depends: vec!["jq".to_string()],
        }
    }

    #[tokio::test]
    async fn test_generated_files() {
        let (_templates, pkgdir, generator) = generator_fixture().await;
        let ctx = context_with_metadata(&pkgdir, metadata());

        generator.generate(&ctx).await.unwrap();

        let control = tokio::fs::read_to_string(pkgdir.path().join("DEBIAN/control"))
            .await
            .unwrap();
        assert!(control.contains("Package: wazo-plugind-foobar-plugindtests"));
        assert!(control.contains("Version: 0.0.1"));
        assert!(control.contains("Section: wazo-plugind-plugin"));
        assert!(control.contains("Depends: jq, wazo-plugind-admin-ui-conference-official"));

        let postinst = tokio::fs::read_to_string(pkgdir.path().join("DEBIAN/postinst"))
            .await
            .unwrap();
        assert!(postinst
            .contains("/usr/lib/wazo-plugind/plugins/plugindtests/foobar/wazo/rules postinst"));

        let postrm = tokio::fs::read_to_string(pkgdir.path().join("DEBIAN/postrm"))
            .await
            .unwrap();
        assert!(postrm.contains("/var/lib/wazo-plugind/rules/rules.foobar.plugindtests postrm"));
    }

    #[tokio::test]
    async fn test_maintainer_scripts_are_executable() {
        let (_templates, pkgdir, generator) = generator_fixture().await;
        let ctx = context_with_metadata(&pkgdir, metadata());

        generator.generate(&ctx).await.unwrap();

        for script in ["postinst", "prerm", "postrm"] {
            let mode = tokio::fs::metadata(pkgdir.path().join(DEBIAN_DIR).join(script))
                .await
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, SCRIPT_MODE, "{script} mode");
        }
        let control_mode = tokio::fs::metadata(pkgdir.path().join("DEBIAN/control"))
            .await
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(control_mode & 0o111, 0o111);
    }

    #[tokio::test]
    async fn test_no_depends_renders_no_depends_line() {
        let (_templates, pkgdir, generator) = generator_fixture().await;
        let mut plain = metadata();
        plain.depends.clear();
        plain.debian_depends.clear();
        let ctx = context_with_metadata(&pkgdir, plain);

        generator.generate(&ctx).await.unwrap();

        let control = tokio::fs::read_to_string(pkgdir.path().join("DEBIAN/control"))
            .await
            .unwrap();
        assert!(!control.contains("Depends:"));
    }
}
