//! Rendering an addon directory into Kubernetes objects and preparing them for kubectl.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::kube::api::DynamicObject;

use crate::{
    addon::template::{self, TemplateData},
    crd::addon::ADDON_LABEL_KEY,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read addon directory {}", path.display()))]
    ReadDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read template {}", path.display()))]
    ReadTemplate {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse template {}", path.display()))]
    ParseTemplate {
        #[snafu(source(from(handlebars::TemplateError, Box::new)))]
        source: Box<handlebars::TemplateError>,
        path: PathBuf,
    },

    #[snafu(display("failed to render template {}", path.display()))]
    RenderTemplate {
        #[snafu(source(from(handlebars::RenderError, Box::new)))]
        source: Box<handlebars::RenderError>,
        path: PathBuf,
    },

    #[snafu(display("failed to decode YAML document {index} rendered from {}", path.display()))]
    DecodeDocument {
        source: serde_yaml::Error,
        path: PathBuf,
        index: usize,
    },

    #[snafu(display(
        "YAML document {index} rendered from {} has no apiVersion or kind",
        path.display()
    ))]
    MissingTypeMeta { path: PathBuf, index: usize },

    #[snafu(display("failed to encode manifest as YAML"))]
    EncodeManifest { source: serde_yaml::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Renders every regular file of `dir` as a template and returns the Kubernetes objects in file
/// name order, then document order. Sub-directories are skipped, empty documents dropped.
pub fn parse_from_folder(
    overwrite_registry: &str,
    dir: &Path,
    data: &TemplateData,
) -> Result<Vec<DynamicObject>> {
    let addon_name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).context(ReadDirectorySnafu { path: dir })? {
        let entry = entry.context(ReadDirectorySnafu { path: dir })?;
        let file_type = entry
            .file_type()
            .context(ReadDirectorySnafu { path: entry.path() })?;
        if file_type.is_dir() {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();

    let mut registry = template::registry(overwrite_registry);
    let mut objects = Vec::new();
    for path in files {
        let content = fs::read_to_string(&path).context(ReadTemplateSnafu { path: &path })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let template_name = format!("{addon_name}-{file_name}");

        registry
            .register_template_string(&template_name, content)
            .context(ParseTemplateSnafu { path: &path })?;
        let rendered = registry
            .render(&template_name, data)
            .context(RenderTemplateSnafu { path: &path })?;

        objects.extend(split_documents(&rendered, &path)?);
    }

    tracing::debug!(addon = addon_name, manifests = objects.len(), "Rendered addon");
    Ok(objects)
}

/// Splits a multi-document YAML stream into objects, skipping empty documents.
pub fn split_documents(rendered: &str, path: &Path) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(rendered).enumerate() {
        let object = Option::<DynamicObject>::deserialize(document)
            .context(DecodeDocumentSnafu { path, index })?;
        let Some(object) = object else {
            continue;
        };
        object
            .types
            .as_ref()
            .filter(|types| !types.api_version.is_empty() && !types.kind.is_empty())
            .context(MissingTypeMetaSnafu { path, index })?;
        objects.push(object);
    }
    Ok(objects)
}

/// Merges the `kubermatic-addon` label into every object, so kubectl can prune by selector.
pub fn ensure_addon_label(objects: &mut [DynamicObject], addon_name: &str) {
    for object in objects {
        object
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(ADDON_LABEL_KEY.to_string(), addon_name.to_string());
    }
}

/// Encodes the objects as one multi-document YAML stream.
pub fn combine_manifests(objects: &[DynamicObject]) -> Result<String> {
    let parts = objects
        .iter()
        .map(|object| {
            serde_yaml::to_string(object)
                .map(|yaml| yaml.trim().to_string())
                .context(EncodeManifestSnafu)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("\n---\n") + "\n")
}
