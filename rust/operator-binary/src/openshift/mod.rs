//! Manifests of the OpenShift control plane running in the cluster namespace of the seed.

pub mod images;
pub mod kube_controller_manager;
pub mod oauth;
pub mod policy;
pub mod pull_secret;

use stackable_operator::k8s_openapi::{
    api::core::v1::{
        ConfigMapVolumeSource, HTTPGetAction, LocalObjectReference, Probe, SecretVolumeSource,
        Volume,
    },
    apimachinery::pkg::util::intstr::IntOrString,
};

use crate::{
    crd::cluster::{v1, ClusterNetworkingConfig},
    resource::pod::VolumeRevisions,
};

pub const OPENSHIFT_IMAGE_PULL_SECRET_NAME: &str = "openshift-image-pull-secret";

/// Everything the manifest factories need besides the cluster itself. The controller resolves
/// the parts that live in the seed before building manifests.
#[derive(Clone, Debug)]
pub struct ControlPlaneData<'a> {
    pub cluster: &'a v1::Cluster,
    pub overwrite_registry: &'a str,
    /// Image running the `http-prober` in init containers.
    pub prober_image: &'a str,
    /// Whether the seed provides the `dockercfg` pull secret.
    pub docker_pull_secret: bool,
    /// Cluster IP of the `dns-resolver` service.
    pub dns_resolver_ip: String,
    /// Node port allocated to the `openshift-oauth` service, once it exists.
    pub oauth_node_port: Option<i32>,
    pub revisions: VolumeRevisions,
}

impl ControlPlaneData<'_> {
    pub fn cluster_name(&self) -> String {
        stackable_operator::kube::ResourceExt::name_any(self.cluster)
    }

    pub fn namespace(&self) -> String {
        self.cluster.namespace_name()
    }

    pub fn network(&self) -> ClusterNetworkingConfig {
        self.cluster.network_with_defaults()
    }

    pub fn version(&self) -> &str {
        &self.cluster.spec.version
    }
}

pub(crate) fn secret_volume(name: &str, default_mode: Option<i32>) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(name.to_string()),
            default_mode,
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

pub(crate) fn config_map_volume(name: &str, default_mode: Option<i32>) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.to_string(),
            default_mode,
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

pub(crate) fn pull_secrets<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<LocalObjectReference> {
    names
        .into_iter()
        .map(|name| LocalObjectReference {
            name: name.to_string(),
        })
        .collect()
}

/// HTTPS GET probe against the pod itself.
pub(crate) fn https_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTPS".to_string()),
            ..HTTPGetAction::default()
        }),
        failure_threshold: Some(3),
        period_seconds: Some(10),
        success_threshold: Some(1),
        timeout_seconds: Some(15),
        ..Probe::default()
    }
}
