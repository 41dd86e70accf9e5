use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::ResourceRequirements,
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
    versioned::versioned,
};
use strum::Display;

use crate::crd::{
    cloud::{CloudSpec, FEATURE_EXTERNAL_CLOUD_PROVIDER},
    find_condition, Condition, ConditionType, WORKER_NAME_LABEL_KEY,
};

pub const DEFAULT_SERVICES_CIDR: &str = "10.240.16.0/20";
pub const DEFAULT_PODS_CIDR: &str = "172.25.0.0/16";
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to parse cluster version {version:?}"))]
    ParseVersion {
        source: semver::Error,
        version: String,
    },
}

/// Parses a version the way users write them: an optional `v` prefix, and the minor or patch
/// component may be missing (`v1.22` is `1.22.0`).
pub fn parse_version(input: &str) -> Result<semver::Version, semver::Error> {
    let version = input.trim().trim_start_matches('v');
    let strict_error = match semver::Version::parse(version) {
        Ok(version) => return Ok(version),
        Err(error) => error,
    };

    let core_end = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(core_end);
    let components = core.split('.').count();
    if core.is_empty() || components >= 3 {
        return Err(strict_error);
    }
    semver::Version::parse(&format!("{core}{}{suffix}", ".0".repeat(3 - components)))
}

#[versioned(
    version(name = "v1"),
    crates(
        kube_core = "stackable_operator::kube::core",
        kube_client = "stackable_operator::kube::client",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars",
        versioned = "stackable_operator::versioned"
    )
)]
pub mod versioned {
    /// A user cluster. Its control plane runs in the `cluster-<name>` namespace of the seed.
    #[versioned(crd(group = "kubermatic.k8s.io", plural = "clusters", status = "ClusterStatus"))]
    #[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ClusterSpec {
        #[serde(default)]
        pub human_readable_name: String,

        /// Kubernetes version of the control plane, or the OpenShift version for OpenShift
        /// clusters.
        pub version: String,

        pub cloud: CloudSpec,

        #[serde(default)]
        pub cluster_network: ClusterNetworkingConfig,

        #[serde(default)]
        pub expose_strategy: ExposeStrategy,

        /// Set for clusters whose control plane is OpenShift.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub openshift: Option<OpenshiftSpec>,

        #[serde(default)]
        pub components_override: ComponentSettings,

        /// Paused clusters are ignored by all controllers.
        #[serde(default)]
        pub pause: bool,

        #[serde(default)]
        pub features: BTreeMap<String, bool>,
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkingConfig {
    #[serde(default)]
    pub services: NetworkRanges,
    #[serde(default)]
    pub pods: NetworkRanges,
    #[serde(default)]
    pub dns_domain: String,
    #[serde(default)]
    pub proxy_mode: String,
    /// Defaults to enabled when unset.
    #[serde(
        default,
        rename = "nodeLocalDNSCacheEnabled",
        skip_serializing_if = "Option::is_none"
    )]
    pub node_local_dns_cache_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum ExposeStrategy {
    #[default]
    NodePort,
    LoadBalancer,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenshiftSpec {
    /// Docker config JSON used to pull the OpenShift release images.
    #[serde(default)]
    pub image_pull_secret: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiserver: Option<DeploymentSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_manager: Option<DeploymentSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<DeploymentSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub namespace_name: String,
    #[serde(default)]
    pub extended_health: ExtendedClusterHealth,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub address: ClusterAddress,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum HealthStatus {
    #[default]
    Down,
    Up,
    Provisioning,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedClusterHealth {
    #[serde(default)]
    pub apiserver: HealthStatus,
    #[serde(default)]
    pub scheduler: HealthStatus,
    #[serde(default)]
    pub controller: HealthStatus,
    #[serde(default)]
    pub machine_controller: HealthStatus,
    #[serde(default)]
    pub etcd: HealthStatus,
    #[serde(default)]
    pub openvpn: HealthStatus,
    #[serde(default)]
    pub user_cluster_controller_manager: HealthStatus,
}

impl ExtendedClusterHealth {
    pub fn all_healthy(&self) -> bool {
        [
            self.apiserver,
            self.scheduler,
            self.controller,
            self.machine_controller,
            self.etcd,
            self.openvpn,
            self.user_cluster_controller_manager,
        ]
        .iter()
        .all(|status| *status == HealthStatus::Up)
    }
}

/// Where the user cluster's API server is reachable.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAddress {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub external_name: String,
    #[serde(default, rename = "internalURL")]
    pub internal_url: String,
    /// DNS name of the API server service inside the seed, e.g.
    /// `apiserver-external.cluster-xyz42.svc.cluster.local`.
    #[serde(default)]
    pub internal_name: String,
    #[serde(default)]
    pub ip: String,
}

impl v1::Cluster {
    pub fn namespace_name(&self) -> String {
        match &self.status {
            Some(status) if !status.namespace_name.is_empty() => status.namespace_name.clone(),
            _ => format!("cluster-{}", self.name_any()),
        }
    }

    pub fn is_openshift(&self) -> bool {
        self.spec.openshift.is_some()
    }

    /// Whether this cluster belongs to the controller started with `worker_name`.
    pub fn handled_by_worker(&self, worker_name: &str) -> bool {
        self.labels()
            .get(WORKER_NAME_LABEL_KEY)
            .map(String::as_str)
            .unwrap_or_default()
            == worker_name
    }

    pub fn is_apiserver_healthy(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.extended_health.apiserver == HealthStatus::Up)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        find_condition(self.conditions(), type_)
    }

    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.spec.features.get(feature).copied().unwrap_or(false)
    }

    pub fn kubernetes_cloud_provider_name(&self) -> Option<&'static str> {
        self.spec
            .cloud
            .kubernetes_cloud_provider_name(self.feature_enabled(FEATURE_EXTERNAL_CLOUD_PROVIDER))
    }

    pub fn version(&self) -> Result<semver::Version, Error> {
        parse_version(&self.spec.version).context(ParseVersionSnafu {
            version: self.spec.version.clone(),
        })
    }

    pub fn node_local_dns_cache_enabled(&self) -> bool {
        self.spec
            .cluster_network
            .node_local_dns_cache_enabled
            .unwrap_or(true)
    }

    /// Returns the network config with the seed defaults filled into every empty field.
    pub fn network_with_defaults(&self) -> ClusterNetworkingConfig {
        let mut network = self.spec.cluster_network.clone();
        if network.services.cidr_blocks.is_empty() {
            network.services.cidr_blocks = vec![DEFAULT_SERVICES_CIDR.to_string()];
        }
        if network.pods.cidr_blocks.is_empty() {
            network.pods.cidr_blocks = vec![DEFAULT_PODS_CIDR.to_string()];
        }
        if network.dns_domain.is_empty() {
            network.dns_domain = DEFAULT_DNS_DOMAIN.to_string();
        }
        network
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const CLUSTER: &str = r#"
        apiVersion: kubermatic.k8s.io/v1
        kind: Cluster
        metadata:
          name: xyz42
          labels:
            worker-name: alice
        spec:
          version: v1.22.5
          cloud:
            dc: europe-west3-c
            aws: {}
          clusterNetwork:
            services:
              cidrBlocks: ["10.10.10.0/24"]
            dnsDomain: cluster.local
        "#;

    #[test]
    fn test_namespace_name_defaults_to_cluster_prefix() {
        let cluster: v1::Cluster = serde_yaml::from_str(CLUSTER).expect("illegal test input");
        assert_eq!(cluster.namespace_name(), "cluster-xyz42");
        assert!(!cluster.is_openshift());
        assert!(!cluster.is_apiserver_healthy());
        assert_eq!(cluster.kubernetes_cloud_provider_name(), Some("aws"));
        assert_eq!(cluster.version().unwrap(), semver::Version::new(1, 22, 5));
    }

    #[rstest]
    #[case("1.22.5", semver::Version::new(1, 22, 5))]
    #[case("v1.22.5", semver::Version::new(1, 22, 5))]
    #[case("1.22", semver::Version::new(1, 22, 0))]
    #[case("v1.22", semver::Version::new(1, 22, 0))]
    #[case("v4.1", semver::Version::new(4, 1, 0))]
    #[case("1", semver::Version::new(1, 0, 0))]
    fn test_parse_version(#[case] input: &str, #[case] expected: semver::Version) {
        assert_eq!(parse_version(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_partial_version_keeps_pre_release() {
        let version = parse_version("1.22-rc.1").unwrap();
        assert_eq!((version.major, version.minor, version.patch), (1, 22, 0));
        assert_eq!(version.pre.as_str(), "rc.1");
    }

    #[rstest]
    #[case("")]
    #[case("v")]
    #[case("1.x")]
    #[case("1.2.3.4")]
    fn test_parse_invalid_version(#[case] input: &str) {
        assert!(parse_version(input).is_err());
    }

    #[rstest]
    #[case("alice", true)]
    #[case("bob", false)]
    #[case("", false)]
    fn test_handled_by_worker(#[case] worker: &str, #[case] expected: bool) {
        let cluster: v1::Cluster = serde_yaml::from_str(CLUSTER).expect("illegal test input");
        assert_eq!(cluster.handled_by_worker(worker), expected);
    }

    #[test]
    fn test_network_defaults_only_fill_empty_fields() {
        let cluster: v1::Cluster = serde_yaml::from_str(CLUSTER).expect("illegal test input");
        let network = cluster.network_with_defaults();
        assert_eq!(network.services.cidr_blocks, vec!["10.10.10.0/24"]);
        assert_eq!(network.pods.cidr_blocks, vec![DEFAULT_PODS_CIDR]);
        assert_eq!(network.dns_domain, "cluster.local");
        assert!(cluster.node_local_dns_cache_enabled());
    }

    #[test]
    fn test_status_parses_health_and_address() {
        let input = r#"
        apiVersion: kubermatic.k8s.io/v1
        kind: Cluster
        metadata:
          name: os1
        spec:
          version: 4.1.18
          cloud:
            aws: {}
          openshift:
            imagePullSecret: "{}"
        status:
          namespaceName: cluster-os1
          extendedHealth:
            apiserver: Up
          address:
            externalName: os1.europe.example.com
            internalURL: apiserver-external.cluster-os1.svc.cluster.local.
            port: 31000
        "#;
        let cluster: v1::Cluster = serde_yaml::from_str(input).expect("illegal test input");
        assert!(cluster.is_openshift());
        assert!(cluster.is_apiserver_healthy());
        let status = cluster.status.as_ref().unwrap();
        assert_eq!(status.address.port, 31000);
        assert!(!status.extended_health.all_healthy());
    }
}
