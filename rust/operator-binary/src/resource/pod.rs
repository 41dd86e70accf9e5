//! Pod level building blocks of control-plane Deployments.

use std::collections::BTreeMap;

use snafu::{OptionExt, Snafu};
use stackable_operator::{
    builder::pod::resources::ResourceRequirementsBuilder,
    k8s_openapi::{
        api::core::v1::{
            Affinity, Capabilities, Container, PodAffinityTerm, PodAntiAffinity,
            ResourceRequirements, SecurityContext, Volume, VolumeMount, WeightedPodAffinityTerm,
        },
        apimachinery::pkg::apis::meta::v1::LabelSelector,
    },
};

use crate::resource::{
    app_cluster_labels, APP_LABEL_KEY, CLUSTER_LABEL_KEY, OPENVPN_CLIENT_CERTIFICATES_SECRET_NAME,
};

pub const OPENVPN_CLIENT_CONTAINER_NAME: &str = "openvpn-client";
pub const APISERVER_RUNNING_CONTAINER_NAME: &str = "apiserver-running";
const OPENVPN_IMAGE: &str = "quay.io/kubermatic/openvpn:v2.5.2-r0";
const OPENVPN_CLIENT_CERTIFICATES_MOUNT_PATH: &str = "/etc/openvpn/pki/client";
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("no revision known for Secret {name:?}"))]
    MissingSecretRevision { name: String },

    #[snafu(display("no revision known for ConfigMap {name:?}"))]
    MissingConfigMapRevision { name: String },
}

/// Resource versions of the Secrets and ConfigMaps referenced by pod volumes.
#[derive(Clone, Debug, Default)]
pub struct VolumeRevisions {
    pub secrets: BTreeMap<String, String>,
    pub config_maps: BTreeMap<String, String>,
}

impl VolumeRevisions {
    /// Names of the Secrets and ConfigMaps referenced by `volumes` that have no known revision,
    /// because they do not exist yet.
    pub fn missing(&self, volumes: &[Volume]) -> Vec<String> {
        let mut missing = Vec::new();
        for volume in volumes {
            if let Some(secret_name) = volume.secret.as_ref().and_then(|s| s.secret_name.as_ref()) {
                if !self.secrets.contains_key(secret_name) {
                    missing.push(secret_name.clone());
                }
            }
            if let Some(config_map) = &volume.config_map {
                if !self.config_maps.contains_key(&config_map.name) {
                    missing.push(config_map.name.clone());
                }
            }
        }
        missing
    }
}

/// Labels of a pod template: app and cluster labels plus one revision label per referenced
/// Secret or ConfigMap, so that content changes roll the pods.
pub fn pod_template_labels(
    app: &str,
    cluster_name: &str,
    volumes: &[Volume],
    revisions: &VolumeRevisions,
) -> Result<BTreeMap<String, String>, Error> {
    let mut labels = app_cluster_labels(app, cluster_name, []);
    for volume in volumes {
        if let Some(secret_name) = volume.secret.as_ref().and_then(|s| s.secret_name.as_ref()) {
            let revision = revisions
                .secrets
                .get(secret_name)
                .context(MissingSecretRevisionSnafu { name: secret_name })?;
            labels.insert(format!("{secret_name}-secret-revision"), revision.clone());
        }
        if let Some(config_map) = &volume.config_map {
            let revision = revisions
                .config_maps
                .get(&config_map.name)
                .context(MissingConfigMapRevisionSnafu {
                    name: &config_map.name,
                })?;
            labels.insert(
                format!("{}-configmap-revision", config_map.name),
                revision.clone(),
            );
        }
    }
    Ok(labels)
}

/// Applies the per-container defaults, then replaces them with the overrides for the same
/// container name.
pub fn set_resource_requirements(
    containers: &mut [Container],
    defaults: &BTreeMap<String, ResourceRequirements>,
    overrides: &BTreeMap<String, ResourceRequirements>,
) {
    for container in containers {
        if let Some(requirements) = overrides
            .get(&container.name)
            .or_else(|| defaults.get(&container.name))
        {
            container.resources = Some(requirements.clone());
        }
    }
}

/// Prefer spreading the pods of one app of one cluster across nodes.
pub fn hostname_anti_affinity(app: &str, cluster_name: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([
                                (APP_LABEL_KEY.to_string(), app.to_string()),
                                (CLUSTER_LABEL_KEY.to_string(), cluster_name.to_string()),
                            ])),
                            ..LabelSelector::default()
                        }),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..PodAffinityTerm::default()
                    },
                },
            ]),
            ..PodAntiAffinity::default()
        }),
        ..Affinity::default()
    }
}

/// Init container that blocks until the user cluster API server answers, and optionally until
/// the given CRD (`Kind,group/version`) is served.
pub fn apiserver_running_init_container(
    prober_image: &str,
    cluster_namespace: &str,
    crd_to_wait_for: Option<&str>,
) -> Container {
    let mut args = vec![
        "-endpoint".to_string(),
        format!("https://apiserver-external.{cluster_namespace}.svc.cluster.local./healthz"),
        "-insecure".to_string(),
        "-retries".to_string(),
        "100".to_string(),
        "-retry-wait".to_string(),
        "2".to_string(),
        "-timeout".to_string(),
        "1".to_string(),
    ];
    if let Some(crd) = crd_to_wait_for {
        args.push("-crd-to-wait-for".to_string());
        args.push(crd.to_string());
    }

    Container {
        name: APISERVER_RUNNING_CONTAINER_NAME.to_string(),
        image: Some(prober_image.to_string()),
        command: Some(vec!["/usr/local/bin/http-prober".to_string()]),
        args: Some(args),
        resources: Some(
            ResourceRequirementsBuilder::new()
                .with_cpu_request("10m")
                .with_cpu_limit("100m")
                .with_memory_request("16Mi")
                .with_memory_limit("32Mi")
                .build(),
        ),
        ..Container::default()
    }
}

/// OpenVPN client sidecar giving control-plane components access to the user cluster network.
pub fn openvpn_sidecar(registry: &str, cluster_namespace: &str) -> Container {
    let image = crate::openshift::images::with_registry(OPENVPN_IMAGE, registry);
    let remote = format!("openvpn-server.{cluster_namespace}.svc.cluster.local");
    let ca = format!("{OPENVPN_CLIENT_CERTIFICATES_MOUNT_PATH}/ca.crt");
    let cert = format!("{OPENVPN_CLIENT_CERTIFICATES_MOUNT_PATH}/client.crt");
    let key = format!("{OPENVPN_CLIENT_CERTIFICATES_MOUNT_PATH}/client.key");
    let args: Vec<String> = [
        "--client",
        "--proto",
        "tcp",
        "--dev",
        "tun",
        "--auth-nocache",
        "--remote",
        remote.as_str(),
        "1194",
        "--nobind",
        "--connect-timeout",
        "5",
        "--connect-retry",
        "1",
        "--ca",
        ca.as_str(),
        "--cert",
        cert.as_str(),
        "--key",
        key.as_str(),
        "--remote-cert-tls",
        "server",
        "--link-mtu",
        "1432",
        "--cipher",
        "AES-256-GCM",
        "--auth",
        "SHA1",
        "--keysize",
        "256",
        "--script-security",
        "2",
        "--status",
        "/run/openvpn-status",
        "--log",
        "/dev/stdout",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    Container {
        name: OPENVPN_CLIENT_CONTAINER_NAME.to_string(),
        image: Some(image),
        command: Some(vec!["/usr/sbin/openvpn".to_string()]),
        args: Some(args),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Capabilities::default()
            }),
            ..SecurityContext::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: OPENVPN_CLIENT_CERTIFICATES_SECRET_NAME.to_string(),
            mount_path: OPENVPN_CLIENT_CERTIFICATES_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]),
        ..Container::default()
    }
}

pub fn openvpn_sidecar_resources() -> ResourceRequirements {
    ResourceRequirementsBuilder::new()
        .with_cpu_request("5m")
        .with_cpu_limit("100m")
        .with_memory_request("16Mi")
        .with_memory_limit("32Mi")
        .build()
}
