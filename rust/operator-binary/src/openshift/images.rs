//! OpenShift release images by minor version.

use snafu::{OptionExt, Snafu};
use strum::Display;

const OPENSHIFT_ART_REPOSITORY: &str = "quay.io/openshift-release-dev/ocp-v4.0-art-dev";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("no {component} image known for OpenShift version {version:?}"))]
    UnknownVersion {
        component: Component,
        version: String,
    },
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Component {
    Hyperkube,
    Hypershift,
}

struct Release {
    minor: &'static str,
    hyperkube: &'static str,
    hypershift: &'static str,
}

const RELEASES: &[Release] = &[
    Release {
        minor: "4.1",
        hyperkube: "v4.1.18-hyperkube",
        hypershift: "v4.1.18-hypershift",
    },
    Release {
        minor: "4.2",
        hyperkube: "v4.2.0-hyperkube",
        hypershift: "v4.2.0-hypershift",
    },
];

/// Replaces the registry part of `image` when `registry` is non-empty.
pub fn with_registry(image: &str, registry: &str) -> String {
    if registry.is_empty() {
        return image.to_string();
    }
    match image.split_once('/') {
        Some((_, path)) => format!("{registry}/{path}"),
        None => format!("{registry}/{image}"),
    }
}

/// Image of `component` for the OpenShift `version` (`4.1.18`, `v4.2` ...).
pub fn image(component: Component, version: &str, registry: &str) -> Result<String, Error> {
    let minor = version
        .trim_start_matches('v')
        .splitn(3, '.')
        .take(2)
        .collect::<Vec<_>>()
        .join(".");
    let release = RELEASES
        .iter()
        .find(|release| release.minor == minor)
        .context(UnknownVersionSnafu { component, version })?;
    let tag = match component {
        Component::Hyperkube => release.hyperkube,
        Component::Hypershift => release.hypershift,
    };
    Ok(with_registry(
        &format!("{OPENSHIFT_ART_REPOSITORY}:{tag}"),
        registry,
    ))
}

pub fn hyperkube_image(version: &str, registry: &str) -> Result<String, Error> {
    image(Component::Hyperkube, version, registry)
}

pub fn hypershift_image(version: &str, registry: &str) -> Result<String, Error> {
    image(Component::Hypershift, version, registry)
}
