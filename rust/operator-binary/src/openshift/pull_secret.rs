//! Image pull secrets of the control-plane pods.

use std::collections::BTreeMap;

use snafu::{ensure, OptionExt, ResultExt, Snafu};
use stackable_operator::k8s_openapi::{api::core::v1::Secret, ByteString};

use crate::{
    openshift::{ControlPlaneData, OPENSHIFT_IMAGE_PULL_SECRET_NAME},
    resource::{self, base_app_labels, cluster_object_meta, IMAGE_PULL_SECRET_NAME},
};

const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("cluster has no openshift settings"))]
    NotOpenshift,

    #[snafu(display("docker config for Secret {name} is empty"))]
    EmptyDockerConfig { name: String },

    #[snafu(display("docker config for Secret {name} is not valid JSON"))]
    InvalidDockerConfig {
        source: serde_json::Error,
        name: String,
    },

    #[snafu(display("failed to build object metadata"))]
    BuildMetadata { source: resource::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn docker_config_secret(data: &ControlPlaneData, name: &str, docker_config: &str) -> Result<Secret> {
    ensure!(!docker_config.trim().is_empty(), EmptyDockerConfigSnafu { name });
    serde_json::from_str::<serde_json::Value>(docker_config)
        .context(InvalidDockerConfigSnafu { name })?;

    Ok(Secret {
        metadata: cluster_object_meta(data.cluster, name, base_app_labels(name, []))
            .context(BuildMetadataSnafu)?,
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(docker_config.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    })
}

/// `openshift-image-pull-secret`, holding the pull secret of the OpenShift release images from
/// the cluster spec.
pub fn openshift_image_pull_secret(data: &ControlPlaneData) -> Result<Secret> {
    let openshift = data.cluster.spec.openshift.as_ref().context(NotOpenshiftSnafu)?;
    docker_config_secret(
        data,
        OPENSHIFT_IMAGE_PULL_SECRET_NAME,
        &openshift.image_pull_secret,
    )
}

/// `dockercfg`, holding the seed wide pull secret for Kubermatic images.
pub fn image_pull_secret(data: &ControlPlaneData, docker_config: &str) -> Result<Secret> {
    docker_config_secret(data, IMAGE_PULL_SECRET_NAME, docker_config)
}
