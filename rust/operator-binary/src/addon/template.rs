//! Data and helper functions available to addon templates.

use std::{collections::BTreeMap, net::IpAddr};

use base64::{engine::general_purpose::STANDARD, Engine};
use handlebars::{
    handlebars_helper, no_escape, Context, Handlebars, Helper, HelperDef, HelperResult, Output,
    RenderContext, RenderError, RenderErrorReason, ScopedJson,
};
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use stackable_operator::kube::ResourceExt;

use crate::{
    crd::cluster::{self, v1},
    resource::network,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("invalid cluster version"))]
    ClusterVersion { source: cluster::Error },

    #[snafu(display("failed to determine the in-cluster API server IP"))]
    ApiserverIp { source: network::Error },
}

/// Everything an addon template can reference, e.g. `{{Cluster.Network.DNSResolverIP}}`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateData {
    pub datacenter_name: String,
    pub cluster: ClusterData,
    pub credentials: BTreeMap<String, String>,
    pub variables: serde_json::Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterData {
    /// `kubernetes` or `openshift`.
    #[serde(rename = "Type")]
    pub type_: String,
    pub name: String,
    pub human_readable_name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub kubeconfig: String,
    #[serde(rename = "ApiserverExternalURL")]
    pub apiserver_external_url: String,
    #[serde(rename = "ApiserverInternalURL")]
    pub apiserver_internal_url: String,
    pub cloud_provider_name: String,
    pub version: String,
    pub major_minor_version: String,
    /// Names of the enabled feature flags.
    pub features: Vec<String>,
    pub network: ClusterNetwork,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ClusterNetwork {
    #[serde(rename = "DNSDomain")]
    pub dns_domain: String,
    #[serde(rename = "DNSClusterIP")]
    pub dns_cluster_ip: String,
    #[serde(rename = "DNSResolverIP")]
    pub dns_resolver_ip: String,
    /// IP of the `kubernetes` service, for pods that cannot use cluster DNS.
    #[serde(rename = "APIServerServiceIP")]
    pub apiserver_service_ip: String,
    #[serde(rename = "PodCIDRBlocks")]
    pub pod_cidr_blocks: Vec<String>,
    #[serde(rename = "ServiceCIDRBlocks")]
    pub service_cidr_blocks: Vec<String>,
    #[serde(rename = "ProxyMode")]
    pub proxy_mode: String,
    #[serde(rename = "NodeLocalDNSCacheEnabled")]
    pub node_local_dns_cache_enabled: bool,
}

impl TemplateData {
    /// Projects the cluster into template data. The DNS resolver IP is the node-local cache
    /// address unless the cache is disabled for the cluster.
    pub fn new(
        cluster: &v1::Cluster,
        credentials: BTreeMap<String, String>,
        kubeconfig: String,
        dns_cluster_ip: IpAddr,
        node_local_dns_cache_address: &str,
        variables: serde_json::Map<String, Value>,
    ) -> Result<Self, Error> {
        let version = cluster.version().context(ClusterVersionSnafu)?;
        let node_local_dns_cache_enabled = cluster.node_local_dns_cache_enabled();
        let dns_resolver_ip = if node_local_dns_cache_enabled {
            node_local_dns_cache_address.to_string()
        } else {
            dns_cluster_ip.to_string()
        };
        let network = cluster.network_with_defaults();
        let apiserver_service_ip =
            network::in_cluster_apiserver_ip(&network).context(ApiserverIpSnafu)?;
        let address = cluster
            .status
            .as_ref()
            .map(|status| status.address.clone())
            .unwrap_or_default();

        Ok(TemplateData {
            datacenter_name: cluster.spec.cloud.dc.clone(),
            cluster: ClusterData {
                type_: if cluster.is_openshift() {
                    "openshift".to_string()
                } else {
                    "kubernetes".to_string()
                },
                name: cluster.name_any(),
                human_readable_name: cluster.spec.human_readable_name.clone(),
                namespace: cluster.namespace_name(),
                labels: cluster.labels().clone(),
                kubeconfig,
                apiserver_external_url: address.url,
                apiserver_internal_url: address.internal_url,
                cloud_provider_name: cluster
                    .spec
                    .cloud
                    .provider()
                    .map(|provider| provider.to_string())
                    .unwrap_or_default(),
                major_minor_version: format!("{}.{}", version.major, version.minor),
                version: version.to_string(),
                features: cluster
                    .spec
                    .features
                    .iter()
                    .filter(|(_, enabled)| **enabled)
                    .map(|(name, _)| name.clone())
                    .collect(),
                network: ClusterNetwork {
                    dns_domain: network.dns_domain.clone(),
                    dns_cluster_ip: dns_cluster_ip.to_string(),
                    dns_resolver_ip,
                    apiserver_service_ip: apiserver_service_ip.to_string(),
                    pod_cidr_blocks: network.pods.cidr_blocks.clone(),
                    service_cidr_blocks: network.services.cidr_blocks.clone(),
                    proxy_mode: network.proxy_mode.clone(),
                    node_local_dns_cache_enabled,
                },
            },
            credentials,
            variables,
        })
    }
}

/// Merges addon variables: the operator wide defaults for the addon, overridden key by key by
/// the variables of the Addon object.
pub fn merge_variables(
    defaults: Option<&Value>,
    overrides: Option<&Value>,
) -> serde_json::Map<String, Value> {
    let mut variables = match defaults {
        Some(Value::Object(defaults)) => defaults.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(Value::Object(overrides)) = overrides {
        for (key, value) in overrides {
            variables.insert(key.clone(), value.clone());
        }
    }
    variables
}

/// Sprig compatible emptiness: null, false, zero, and empty strings or collections.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn semver_matches(constraint: &str, version: &str) -> Result<bool, RenderErrorReason> {
    let requirement = semver::VersionReq::parse(constraint).map_err(|error| {
        RenderErrorReason::Other(format!("invalid semver constraint {constraint:?}: {error}"))
    })?;
    let version = cluster::parse_version(version).map_err(|error| {
        RenderErrorReason::Other(format!("invalid semver version {version:?}: {error}"))
    })?;
    Ok(requirement.matches(&version))
}

/// `semverCompare <constraint> <version>`. Unlike the other helpers a malformed argument fails
/// the render instead of evaluating to false.
struct SemverCompare;

impl HelperDef for SemverCompare {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let param = |index: usize| {
            h.param(index)
                .and_then(|param| param.value().as_str())
                .ok_or(RenderErrorReason::ParamNotFoundForIndex("semverCompare", index))
        };
        let matches = semver_matches(param(0)?, param(1)?)?;
        Ok(ScopedJson::Derived(Value::Bool(matches)))
    }
}

handlebars_helper!(default_helper: |fallback: Json, value: Json| {
    if is_empty(value) { fallback.clone() } else { value.clone() }
});
handlebars_helper!(quote: |value: Json| format!("{:?}", to_plain_string(value)));
handlebars_helper!(b64enc: |value: str| STANDARD.encode(value));
handlebars_helper!(indent: |width: u64, value: str| {
    let padding = " ".repeat(width as usize);
    value
        .lines()
        .map(|line| format!("{padding}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
});
handlebars_helper!(join: |separator: str, values: array| {
    values.iter().map(to_plain_string).collect::<Vec<_>>().join(separator)
});
handlebars_helper!(to_yaml: |value: Json| {
    serde_yaml::to_string(value)
        .map(|yaml| yaml.trim_end().to_string())
        .unwrap_or_default()
});

/// A template registry with all addon helpers registered. `Registry "<default>"` resolves to
/// `overwrite_registry` when it is non-empty.
pub fn registry(overwrite_registry: &str) -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(no_escape);

    let overwrite_registry = overwrite_registry.to_string();
    handlebars.register_helper(
        "Registry",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                let default = h
                    .param(0)
                    .and_then(|param| param.value().as_str())
                    .ok_or(RenderErrorReason::ParamNotFoundForIndex("Registry", 0))?;
                if overwrite_registry.is_empty() {
                    out.write(default)?;
                } else {
                    out.write(&overwrite_registry)?;
                }
                Ok(())
            },
        ),
    );
    handlebars.register_helper("default", Box::new(default_helper));
    handlebars.register_helper("quote", Box::new(quote));
    handlebars.register_helper("b64enc", Box::new(b64enc));
    handlebars.register_helper("indent", Box::new(indent));
    handlebars.register_helper("join", Box::new(join));
    handlebars.register_helper("toYaml", Box::new(to_yaml));
    handlebars.register_helper("semverCompare", Box::new(SemverCompare));
    handlebars
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const CLUSTER: &str = r#"
        apiVersion: kubermatic.k8s.io/v1
        kind: Cluster
        metadata:
          name: xyz42
        spec:
          version: v1.22.5
          humanReadableName: happy-cluster
          cloud:
            dc: europe-west3-c
            openstack: {}
          features:
            externalCloudProvider: true
            ccmMigration: false
          clusterNetwork:
            services:
              cidrBlocks: ["10.240.16.0/20"]
            pods:
              cidrBlocks: ["172.25.0.0/16"]
            dnsDomain: cluster.local
            proxyMode: ipvs
        "#;

    fn template_data(cluster_yaml: &str) -> TemplateData {
        let cluster: v1::Cluster = serde_yaml::from_str(cluster_yaml).expect("illegal test input");
        TemplateData::new(
            &cluster,
            BTreeMap::from([("username".to_string(), "admin".to_string())]),
            "kubeconfig-content".to_string(),
            IpAddr::from([10, 240, 16, 10]),
            "169.254.20.10",
            serde_json::Map::new(),
        )
        .unwrap()
    }

    fn render(template: &str, data: &TemplateData) -> String {
        registry("").render_template(template, data).unwrap()
    }

    #[test]
    fn test_template_data_projection() {
        let data = template_data(CLUSTER);
        assert_eq!(data.cluster.name, "xyz42");
        assert_eq!(data.cluster.namespace, "cluster-xyz42");
        assert_eq!(data.cluster.type_, "kubernetes");
        assert_eq!(data.cluster.version, "1.22.5");
        assert_eq!(data.cluster.major_minor_version, "1.22");
        assert_eq!(data.cluster.cloud_provider_name, "openstack");
        assert_eq!(data.cluster.features, vec!["externalCloudProvider"]);
        assert_eq!(data.datacenter_name, "europe-west3-c");
    }

    #[test]
    fn test_dns_resolver_ip_uses_node_local_cache_by_default() {
        let data = template_data(CLUSTER);
        assert_eq!(data.cluster.network.dns_resolver_ip, "169.254.20.10");
        assert_eq!(data.cluster.network.dns_cluster_ip, "10.240.16.10");
        assert_eq!(data.cluster.network.apiserver_service_ip, "10.240.16.1");
    }

    #[test]
    fn test_dns_resolver_ip_without_node_local_cache() {
        let input = CLUSTER.replace(
            "proxyMode: ipvs",
            "proxyMode: ipvs\n            nodeLocalDNSCacheEnabled: false",
        );
        let data = template_data(&input);
        assert_eq!(data.cluster.network.dns_resolver_ip, "10.240.16.10");
        assert!(!data.cluster.network.node_local_dns_cache_enabled);
    }

    #[test]
    fn test_field_names_are_pascal_case() {
        let data = template_data(CLUSTER);
        assert_eq!(
            render(
                "{{Cluster.Name}} {{Cluster.Network.DNSResolverIP}} {{Cluster.Network.PodCIDRBlocks.[0]}} {{Credentials.username}}",
                &data
            ),
            "xyz42 169.254.20.10 172.25.0.0/16 admin"
        );
    }

    #[rstest]
    #[case("", "quay.io/kubermatic/addon")]
    #[case("registry.corp", "registry.corp/kubermatic/addon")]
    fn test_registry_helper(#[case] overwrite: &str, #[case] expected: &str) {
        let output = registry(overwrite)
            .render_template(r#"{{Registry "quay.io"}}/kubermatic/addon"#, &json!({}))
            .unwrap();
        assert_eq!(output, expected);
    }

    #[rstest]
    #[case(r#"{{default "fallback" Variables.missing}}"#, "fallback")]
    #[case(r#"{{default "fallback" Variables.mtu}}"#, "1450")]
    #[case(r#"{{quote Variables.name}}"#, "\"a&b\"")]
    #[case(r#"{{b64enc Variables.name}}"#, "YSZi")]
    #[case(r#"{{join "," Variables.list}}"#, "a,b")]
    #[case("{{indent 2 Variables.multi}}", "  x\n  y")]
    #[case(r#"{{#if (semverCompare ">=1.21" Cluster.Version)}}new{{else}}old{{/if}}"#, "new")]
    #[case(r#"{{#if (semverCompare "<1.21" Cluster.Version)}}new{{else}}old{{/if}}"#, "old")]
    #[case("{{toYaml Variables.list}}", "- a\n- b")]
    fn test_helpers(#[case] template: &str, #[case] expected: &str) {
        let mut data = template_data(CLUSTER);
        data.variables = json!({
            "mtu": 1450,
            "name": "a&b",
            "list": ["a", "b"],
            "multi": "x\ny",
        })
        .as_object()
        .cloned()
        .unwrap();
        assert_eq!(render(template, &data), expected);
    }

    #[rstest]
    #[case(r#"{{#if (semverCompare "not a constraint" Cluster.Version)}}new{{/if}}"#)]
    #[case(r#"{{#if (semverCompare ">=1.21" "latest")}}new{{/if}}"#)]
    fn test_semver_compare_rejects_malformed_arguments(#[case] template: &str) {
        let data = template_data(CLUSTER);
        assert!(registry("").render_template(template, &data).is_err());
    }

    #[test]
    fn test_network_uses_seed_defaults() {
        let input = CLUSTER
            .replace("              cidrBlocks: [\"172.25.0.0/16\"]\n", "              cidrBlocks: []\n")
            .replace("            dnsDomain: cluster.local\n", "");
        let data = template_data(&input);
        assert_eq!(data.cluster.network.pod_cidr_blocks, vec!["172.25.0.0/16"]);
        assert_eq!(data.cluster.network.dns_domain, "cluster.local");
    }

    #[test]
    fn test_merge_variables_overrides_per_key() {
        let merged = merge_variables(
            Some(&json!({"mtu": 1400, "backend": "vxlan"})),
            Some(&json!({"mtu": 1450})),
        );
        assert_eq!(Value::Object(merged), json!({"mtu": 1450, "backend": "vxlan"}));
        assert!(merge_variables(None, None).is_empty());
    }
}
