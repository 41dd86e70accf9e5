//! Addons: directories of manifest templates rendered against a cluster and applied to it.

pub mod kubectl;
pub mod manifest;
pub mod template;

use std::path::Path;

use snafu::{ResultExt, Snafu};

use crate::addon::template::TemplateData;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to render addon {addon}"))]
    Render {
        source: manifest::Error,
        addon: String,
    },

    #[snafu(display("failed to combine manifests of addon {addon}"))]
    Combine {
        source: manifest::Error,
        addon: String,
    },
}

impl Error {
    /// Whether the addon directory does not exist, e.g. after the addon was dropped from the
    /// image.
    pub fn is_missing_addon(&self) -> bool {
        matches!(
            self,
            Error::Render {
                source: manifest::Error::ReadDirectory { source, .. },
                ..
            } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Renders `<addons_path>/<addon_name>` and returns the labeled objects as one YAML stream,
/// ready to be handed to kubectl.
pub fn render_addon(
    addons_path: &Path,
    overwrite_registry: &str,
    addon_name: &str,
    data: &TemplateData,
) -> Result<String, Error> {
    let dir = addons_path.join(addon_name);
    let mut objects = manifest::parse_from_folder(overwrite_registry, &dir, data)
        .context(RenderSnafu { addon: addon_name })?;
    manifest::ensure_addon_label(&mut objects, addon_name);
    manifest::combine_manifests(&objects).context(CombineSnafu { addon: addon_name })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_render_addon_labels_everything() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("node-exporter");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(
            dir.join("ds.yaml"),
            indoc! {r#"
                apiVersion: apps/v1
                kind: DaemonSet
                metadata:
                  name: node-exporter
                  namespace: kube-system
                spec:
                  template:
                    spec:
                      containers:
                      - name: node-exporter
                        image: {{Registry "quay.io"}}/prometheus/node-exporter:v0.18.1
            "#},
        )
        .unwrap();

        let manifest = render_addon(
            root.path(),
            "",
            "node-exporter",
            &TemplateData::default(),
        )
        .unwrap();

        assert!(manifest.contains("kubermatic-addon: node-exporter"));
        assert!(manifest.contains("image: quay.io/prometheus/node-exporter:v0.18.1"));
        assert!(manifest.ends_with('\n'));
    }

    #[test]
    fn test_render_unknown_addon() {
        let root = tempfile::tempdir().unwrap();
        let error = render_addon(root.path(), "", "missing", &TemplateData::default()).unwrap_err();
        assert!(error.is_missing_addon());
        assert!(matches!(error, Error::Render { addon, .. } if addon == "missing"));
    }
}
