//! The OpenShift flavoured kube-controller-manager: its config file and its Deployment.

use std::collections::BTreeMap;

use serde::Serialize;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{
        configmap::ConfigMapBuilder,
        pod::{container::ContainerBuilder, resources::ResourceRequirementsBuilder, PodBuilder},
    },
    k8s_openapi::{
        api::{
            apps::v1::{Deployment, DeploymentSpec},
            core::v1::{ConfigMap, PodSpec, ResourceRequirements, Volume, VolumeMount},
        },
        apimachinery::pkg::apis::meta::v1::LabelSelector,
    },
    kube::core::ObjectMeta,
};

use crate::{
    crd::cloud::CloudSpec,
    openshift::{
        config_map_volume, https_probe, images, pull_secrets, secret_volume, ControlPlaneData,
        OPENSHIFT_IMAGE_PULL_SECRET_NAME,
    },
    resource::{
        self, base_app_labels, cluster_object_meta,
        network::{user_cluster_dns_config, USER_CLUSTER_DNS_POLICY},
        pod::{
            apiserver_running_init_container, openvpn_sidecar, openvpn_sidecar_resources,
            pod_template_labels, set_resource_requirements, OPENVPN_CLIENT_CONTAINER_NAME,
        },
        CA_SECRET_NAME, CLOUD_CONFIG_CONFIGMAP_NAME, CONTROLLER_MANAGER_DEPLOYMENT_NAME,
        CONTROLLER_MANAGER_KUBECONFIG_SECRET_NAME, DEFAULT_OWNER_READ_ONLY_MODE,
        FRONT_PROXY_CA_SECRET_NAME, OPENVPN_CLIENT_CERTIFICATES_SECRET_NAME,
        SERVICE_ACCOUNT_KEY_SECRET_NAME,
    },
};

pub const CONFIG_CONFIGMAP_NAME: &str = "openshift-kube-controller-manager-config";
pub const CONFIG_CONFIGMAP_KEY: &str = "config.yaml";

const CA_CERT_PATH: &str = "/etc/kubernetes/pki/ca/ca.crt";
const CA_KEY_PATH: &str = "/etc/kubernetes/pki/ca/ca.key";
const SERVICE_ACCOUNT_KEY_PATH: &str = "/etc/kubernetes/service-account-key/sa.key";
const FRONT_PROXY_CA_CERT_PATH: &str = "/etc/kubernetes/pki/front-proxy/ca/ca.crt";
const KUBECONFIG_PATH: &str = "/etc/kubernetes/kubeconfig/kubeconfig";
const OPENSHIFT_CONFIG_PATH: &str = "/etc/origin/config.yaml";
const CLOUD_CONFIG_PATH: &str = "/etc/kubernetes/cloud/config";
/// Key of the cloud-config ConfigMap holding a fake VM UUID, see
/// <https://github.com/kubernetes/kubernetes/issues/65145>.
const FAKE_VMWARE_UUID_KEY: &str = "fakeVmwareUUID";
const SECURE_PORT: i32 = 10257;
const HYPERKUBE_COMMAND: &str = "kube-controller-manager";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to build object metadata"))]
    BuildMetadata { source: resource::Error },

    #[snafu(display("failed to serialize the controller manager config"))]
    SerializeConfig { source: serde_yaml::Error },

    #[snafu(display("failed to build ConfigMap {CONFIG_CONFIGMAP_NAME}"))]
    BuildConfigMap {
        source: stackable_operator::builder::configmap::Error,
    },

    #[snafu(display("failed to resolve the hyperkube image"))]
    ResolveImage { source: images::Error },

    #[snafu(display("failed to configure user cluster DNS"))]
    DnsConfig {
        source: resource::network::Error,
    },

    #[snafu(display("invalid container name {name:?}"))]
    InvalidContainerName {
        name: String,
        source: stackable_operator::builder::pod::container::Error,
    },

    #[snafu(display("failed to add volume mount"))]
    AddVolumeMount {
        source: stackable_operator::builder::pod::container::Error,
    },

    #[snafu(display("failed to add volume"))]
    AddVolume {
        source: stackable_operator::builder::pod::Error,
    },

    #[snafu(display("failed to build pod template labels"))]
    PodTemplateLabels { source: resource::pod::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeControllerManagerConfig {
    api_version: &'static str,
    kind: &'static str,
    service_serving_cert: ServiceServingCert,
    extended_arguments: BTreeMap<&'static str, Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceServingCert {
    cert_file: &'static str,
}

/// Whether the controller manager must set up cloud routes, `None` leaves the flag unset.
pub fn configure_cloud_routes(cloud: &CloudSpec) -> Option<bool> {
    if cloud.gcp.is_some() {
        Some(true)
    } else if cloud.aws.is_some()
        || cloud.azure.is_some()
        || cloud.openstack.is_some()
        || cloud.vsphere.is_some()
    {
        Some(false)
    } else {
        None
    }
}

fn extended_arguments(data: &ControlPlaneData) -> BTreeMap<&'static str, Vec<String>> {
    let network = data.network();
    let first = |blocks: &[String]| blocks.first().cloned().unwrap_or_default();
    let one = |value: &str| vec![value.to_string()];

    let mut args = BTreeMap::from([
        ("allocate-node-cidrs", one("true")),
        ("cert-dir", one("/var/run/kubernetes")),
        ("cluster-cidr", vec![first(&network.pods.cidr_blocks)]),
        ("cluster-signing-cert-file", one(CA_CERT_PATH)),
        ("cluster-signing-key-file", one(CA_KEY_PATH)),
        (
            "controllers",
            ["*", "-ttl", "-bootstrapsigner", "-tokencleaner"]
                .map(String::from)
                .to_vec(),
        ),
        ("enable-dynamic-provisioning", one("true")),
        ("experimental-cluster-signing-duration", one("720h")),
        (
            "feature-gates",
            [
                "ExperimentalCriticalPodAnnotation=true",
                "RotateKubeletServerCertificate=true",
                "SupportPodPidsLimit=true",
                "LocalStorageCapacityIsolation=false",
            ]
            .map(String::from)
            .to_vec(),
        ),
        (
            "flex-volume-plugin-dir",
            one("/etc/kubernetes/kubelet-plugins/volume/exec"),
        ),
        ("kube-api-burst", one("300")),
        ("kube-api-qps", one("150")),
        ("leader-elect", one("true")),
        // Updating configmap locks is forbidden without extra bindings.
        ("leader-elect-resource-lock", one("endpoints")),
        ("leader-elect-retry-period", one("3s")),
        ("port", one("0")),
        ("root-ca-file", one(CA_CERT_PATH)),
        ("secure-port", vec![SECURE_PORT.to_string()]),
        ("service-account-private-key-file", one(SERVICE_ACCOUNT_KEY_PATH)),
        ("service-cluster-ip-range", vec![first(&network.services.cidr_blocks)]),
        ("use-service-account-credentials", one("true")),
    ]);
    if let Some(cloud_provider) = data.cluster.kubernetes_cloud_provider_name() {
        args.insert("cloud-provider", one(cloud_provider));
        args.insert("cloud-config", one(CLOUD_CONFIG_PATH));
    }
    if let Some(configure) = configure_cloud_routes(&data.cluster.spec.cloud) {
        args.insert("configure-cloud-routes", vec![configure.to_string()]);
    }
    args
}

/// The `KubeControllerManagerConfig` read by hyperkube through `--openshift-config`.
pub fn config_map(data: &ControlPlaneData) -> Result<ConfigMap> {
    let config = KubeControllerManagerConfig {
        api_version: "kubecontrolplane.config.openshift.io/v1",
        kind: "KubeControllerManagerConfig",
        service_serving_cert: ServiceServingCert {
            cert_file: CA_CERT_PATH,
        },
        extended_arguments: extended_arguments(data),
    };
    let config = serde_yaml::to_string(&config).context(SerializeConfigSnafu)?;

    ConfigMapBuilder::new()
        .metadata(metadata(data, CONFIG_CONFIGMAP_NAME)?)
        .add_data(CONFIG_CONFIGMAP_KEY, config)
        .build()
        .context(BuildConfigMapSnafu)
}

fn metadata(data: &ControlPlaneData, name: &str) -> Result<ObjectMeta> {
    cluster_object_meta(data.cluster, name, base_app_labels(name, [])).context(BuildMetadataSnafu)
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirementsBuilder::new()
        .with_cpu_request("100m")
        .with_cpu_limit("2")
        .with_memory_request("100Mi")
        .with_memory_limit("2Gi")
        .build()
}

fn container_args() -> Vec<String> {
    vec![
        format!("--openshift-config={OPENSHIFT_CONFIG_PATH}"),
        format!("--kubeconfig={KUBECONFIG_PATH}"),
        format!("--authentication-kubeconfig={KUBECONFIG_PATH}"),
        format!("--authorization-kubeconfig={KUBECONFIG_PATH}"),
        format!("--client-ca-file={CA_CERT_PATH}"),
        format!("--requestheader-client-ca-file={FRONT_PROXY_CA_CERT_PATH}"),
        "-v=2".to_string(),
    ]
}

/// Volumes of the `controller-manager` pods.
pub fn volumes() -> Vec<Volume> {
    let read_only = Some(DEFAULT_OWNER_READ_ONLY_MODE);
    vec![
        secret_volume(CA_SECRET_NAME, read_only),
        secret_volume(SERVICE_ACCOUNT_KEY_SECRET_NAME, read_only),
        secret_volume(OPENVPN_CLIENT_CERTIFICATES_SECRET_NAME, read_only),
        secret_volume(CONTROLLER_MANAGER_KUBECONFIG_SECRET_NAME, read_only),
        config_map_volume(CONFIG_CONFIGMAP_NAME, read_only),
        secret_volume(FRONT_PROXY_CA_SECRET_NAME, read_only),
        config_map_volume(CLOUD_CONFIG_CONFIGMAP_NAME, None),
    ]
}

/// The `controller-manager` Deployment.
pub fn deployment(data: &ControlPlaneData) -> Result<Deployment> {
    let cluster_name = data.cluster_name();
    let namespace = data.namespace();
    let image = images::hyperkube_image(data.version(), data.overwrite_registry)
        .context(ResolveImageSnafu)?;

    let mut cb_controller_manager = ContainerBuilder::new(CONTROLLER_MANAGER_DEPLOYMENT_NAME)
        .context(InvalidContainerNameSnafu {
            name: CONTROLLER_MANAGER_DEPLOYMENT_NAME,
        })?;
    cb_controller_manager
        .image(image)
        .command(vec!["hyperkube".to_string(), HYPERKUBE_COMMAND.to_string()])
        .args(container_args())
        .readiness_probe(https_probe("healthz", SECURE_PORT));
    for (volume, mount_path) in [
        (CA_SECRET_NAME, "/etc/kubernetes/pki/ca"),
        (SERVICE_ACCOUNT_KEY_SECRET_NAME, "/etc/kubernetes/service-account-key"),
        (CONTROLLER_MANAGER_KUBECONFIG_SECRET_NAME, "/etc/kubernetes/kubeconfig"),
        (CONFIG_CONFIGMAP_NAME, "/etc/origin"),
        (FRONT_PROXY_CA_SECRET_NAME, "/etc/kubernetes/pki/front-proxy/ca"),
        (CLOUD_CONFIG_CONFIGMAP_NAME, "/etc/kubernetes/cloud"),
    ] {
        cb_controller_manager
            .add_volume_mount(volume, mount_path)
            .context(AddVolumeMountSnafu)?;
    }
    let mut controller_manager = cb_controller_manager.build();
    for mount in controller_manager.volume_mounts.iter_mut().flatten() {
        mount.read_only = Some(true);
    }
    if data.cluster.spec.cloud.vsphere.is_some() {
        controller_manager
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: CLOUD_CONFIG_CONFIGMAP_NAME.to_string(),
                sub_path: Some(FAKE_VMWARE_UUID_KEY.to_string()),
                mount_path: "/sys/class/dmi/id/product_serial".to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            });
    }

    let volumes = volumes();
    let labels = pod_template_labels(
        CONTROLLER_MANAGER_DEPLOYMENT_NAME,
        &cluster_name,
        &volumes,
        &data.revisions,
    )
    .context(PodTemplateLabelsSnafu)?;

    let mut containers = vec![
        openvpn_sidecar(data.overwrite_registry, &namespace),
        controller_manager,
    ];
    let defaults = BTreeMap::from([
        (CONTROLLER_MANAGER_DEPLOYMENT_NAME.to_string(), default_resources()),
        (
            OPENVPN_CLIENT_CONTAINER_NAME.to_string(),
            openvpn_sidecar_resources(),
        ),
    ]);
    let overrides = data
        .cluster
        .spec
        .components_override
        .controller_manager
        .as_ref()
        .and_then(|settings| settings.resources.clone())
        .map(|resources| BTreeMap::from([(CONTROLLER_MANAGER_DEPLOYMENT_NAME.to_string(), resources)]))
        .unwrap_or_default();
    set_resource_requirements(&mut containers, &defaults, &overrides);

    let mut pod_builder = PodBuilder::new();
    pod_builder
        .metadata(ObjectMeta {
            labels: Some(labels),
            ..ObjectMeta::default()
        })
        .add_init_container(apiserver_running_init_container(
            data.prober_image,
            &namespace,
            None,
        ));
    for container in containers {
        pod_builder.add_container(container);
    }
    for volume in volumes {
        pod_builder.add_volume(volume).context(AddVolumeSnafu)?;
    }
    let mut template = pod_builder.build_template();
    let pod_spec = template.spec.get_or_insert_with(PodSpec::default);
    pod_spec.image_pull_secrets = Some(pull_secrets([OPENSHIFT_IMAGE_PULL_SECRET_NAME]));
    pod_spec.dns_policy = Some(USER_CLUSTER_DNS_POLICY.to_string());
    pod_spec.dns_config = Some(
        user_cluster_dns_config(&data.dns_resolver_ip, &data.network().dns_domain)
            .context(DnsConfigSnafu)?,
    );

    let replicas = data
        .cluster
        .spec
        .components_override
        .controller_manager
        .as_ref()
        .and_then(|settings| settings.replicas)
        .unwrap_or(1);

    Ok(Deployment {
        metadata: metadata(data, CONTROLLER_MANAGER_DEPLOYMENT_NAME)?,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(base_app_labels(CONTROLLER_MANAGER_DEPLOYMENT_NAME, [])),
                ..LabelSelector::default()
            },
            template,
            ..DeploymentSpec::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::resource::{
        pod::VolumeRevisions,
        test_support::{cluster_from_yaml, OPENSHIFT_CLUSTER},
    };

    fn revisions() -> VolumeRevisions {
        let secrets = [
            CA_SECRET_NAME,
            SERVICE_ACCOUNT_KEY_SECRET_NAME,
            OPENVPN_CLIENT_CERTIFICATES_SECRET_NAME,
            CONTROLLER_MANAGER_KUBECONFIG_SECRET_NAME,
            FRONT_PROXY_CA_SECRET_NAME,
        ];
        VolumeRevisions {
            secrets: secrets
                .iter()
                .map(|name| (name.to_string(), "1".to_string()))
                .collect(),
            config_maps: [CONFIG_CONFIGMAP_NAME, CLOUD_CONFIG_CONFIGMAP_NAME]
                .iter()
                .map(|name| (name.to_string(), "2".to_string()))
                .collect(),
        }
    }

    fn data(cluster: &crate::crd::cluster::v1::Cluster) -> ControlPlaneData<'_> {
        ControlPlaneData {
            cluster,
            overwrite_registry: "",
            prober_image: "quay.io/kubermatic/kubermatic:v2.14.0",
            docker_pull_secret: true,
            dns_resolver_ip: "10.240.16.19".to_string(),
            oauth_node_port: None,
            revisions: revisions(),
        }
    }

    fn config(cluster: &crate::crd::cluster::v1::Cluster) -> serde_yaml::Value {
        let config_map = config_map(&data(cluster)).unwrap();
        serde_yaml::from_str(&config_map.data.unwrap()[CONFIG_CONFIGMAP_KEY]).unwrap()
    }

    #[test]
    fn test_config_map() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let config = config(&cluster);

        assert_eq!(config["kind"], "KubeControllerManagerConfig");
        let args = &config["extendedArguments"];
        assert_eq!(args["cluster-cidr"][0], "172.25.0.0/16");
        assert_eq!(args["service-cluster-ip-range"][0], "10.240.16.0/20");
        assert_eq!(args["cloud-provider"][0], "aws");
        assert_eq!(args["cloud-config"][0], CLOUD_CONFIG_PATH);
        assert_eq!(args["configure-cloud-routes"][0], "false");
        assert_eq!(args["secure-port"][0], "10257");
        assert_eq!(args["controllers"].as_sequence().unwrap().len(), 4);
    }

    #[test]
    fn test_config_without_cloud_provider() {
        let cluster = cluster_from_yaml(
            &OPENSHIFT_CLUSTER.replace("aws: {}", "digitalocean: {}"),
        );
        let config = config(&cluster);
        let args = &config["extendedArguments"];
        assert!(args.get("cloud-provider").is_none());
        assert!(args.get("configure-cloud-routes").is_none());
    }

    #[rstest]
    #[case("gcp: {}", Some(true))]
    #[case("vsphere: {}", Some(false))]
    #[case("hetzner: {}", None)]
    fn test_configure_cloud_routes(#[case] provider: &str, #[case] expected: Option<bool>) {
        let cluster = cluster_from_yaml(&OPENSHIFT_CLUSTER.replace("aws: {}", provider));
        assert_eq!(configure_cloud_routes(&cluster.spec.cloud), expected);
    }

    #[test]
    fn test_deployment() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let deployment = deployment(&data(&cluster)).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("controller-manager"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("cluster-os1"));
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let template = spec.template;
        let labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels["ca-secret-revision"], "1");
        assert_eq!(
            labels["openshift-kube-controller-manager-config-configmap-revision"],
            "2"
        );

        let pod = template.spec.unwrap();
        assert_eq!(pod.dns_policy.as_deref(), Some("None"));
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 7);
        assert_eq!(pod.init_containers.unwrap()[0].name, "apiserver-running");
        // Hyperkube comes from the OpenShift registry only.
        assert_eq!(
            pod.image_pull_secrets.unwrap(),
            pull_secrets([OPENSHIFT_IMAGE_PULL_SECRET_NAME])
        );

        let containers = pod.containers;
        assert_eq!(containers[0].name, "openvpn-client");
        let controller_manager = &containers[1];
        assert_eq!(
            controller_manager.image.as_deref(),
            Some("quay.io/openshift-release-dev/ocp-v4.0-art-dev:v4.1.18-hyperkube")
        );
        assert_eq!(
            controller_manager.command.as_ref().unwrap(),
            &vec!["hyperkube", "kube-controller-manager"]
        );
        assert_eq!(
            controller_manager.resources,
            Some(default_resources())
        );
        assert!(controller_manager
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .all(|mount| mount.read_only == Some(true)));
    }

    #[test]
    fn test_deployment_overrides() {
        let cluster = cluster_from_yaml(&OPENSHIFT_CLUSTER.replace(
            "exposeStrategy: NodePort",
            "exposeStrategy: NodePort\n          componentsOverride:\n            controllerManager:\n              replicas: 3\n              resources:\n                requests:\n                  cpu: 500m",
        ));
        let deployment = deployment(&data(&cluster)).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let pod = spec.template.spec.unwrap();
        let requests = pod.containers[1]
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests["cpu"].0, "500m");
    }

    #[test]
    fn test_vsphere_mounts_fake_serial() {
        let cluster = cluster_from_yaml(&OPENSHIFT_CLUSTER.replace("aws: {}", "vsphere: {}"));
        let deployment = deployment(&data(&cluster)).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let mount = pod.containers[1]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|mount| mount.mount_path == "/sys/class/dmi/id/product_serial")
            .cloned()
            .unwrap();
        assert_eq!(mount.sub_path.as_deref(), Some(FAKE_VMWARE_UUID_KEY));
    }

    #[test]
    fn test_volumes_have_revisions() {
        assert!(revisions().missing(&volumes()).is_empty());
        assert_eq!(
            VolumeRevisions::default().missing(&volumes()).len(),
            volumes().len()
        );
    }

    #[test]
    fn test_deployment_needs_revisions() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let mut data = data(&cluster);
        data.revisions = VolumeRevisions::default();
        assert!(matches!(
            deployment(&data),
            Err(Error::PodTemplateLabels { .. })
        ));
    }
}
