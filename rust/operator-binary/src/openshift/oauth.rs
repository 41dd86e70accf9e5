//! The OpenShift OAuth server (`openshift-osinserver`) and everything it mounts.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use indoc::indoc;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    builder::{
        configmap::ConfigMapBuilder,
        pod::{container::ContainerBuilder, PodBuilder},
    },
    k8s_openapi::{
        api::{
            apps::v1::{Deployment, DeploymentSpec},
            core::v1::{
                ConfigMap, PodSpec, ResourceRequirements, Secret, Service, ServicePort,
                ServiceSpec, Volume,
            },
        },
        apimachinery::pkg::{
            api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
        },
        ByteString,
    },
    kube::core::ObjectMeta,
};

use crate::{
    crd::cluster::ExposeStrategy,
    openshift::{
        config_map_volume, https_probe, images, pull_secrets, secret_volume, ControlPlaneData,
        OPENSHIFT_IMAGE_PULL_SECRET_NAME,
    },
    resource::{
        self, base_app_labels, cluster_object_meta,
        pod::{apiserver_running_init_container, hostname_anti_affinity, pod_template_labels},
        APP_LABEL_KEY, IMAGE_PULL_SECRET_NAME, INTERNAL_ADMIN_KUBECONFIG_SECRET_NAME,
    },
};

pub const OAUTH_NAME: &str = "openshift-oauth";
pub const SESSION_SECRET_NAME: &str = "openshift-oauth-session-secret";
pub const SERVING_CERT_SECRET_NAME: &str = "openshift-oauth-serving-cert";
pub const OCP_BRANDING_SECRET_NAME: &str = "v4-0-config-system-ocp-branding-template";

const CONFIG_KEY: &str = "config.yaml";
const CONFIG_VOLUME_NAME: &str = "config";
const SERVING_PORT: i32 = 6443;
const NODEPORT_PROXY_EXPOSE_ANNOTATION: &str = "nodeport-proxy.k8s.io/expose";
const NODEPORT_PROXY_EXPOSE_NAMESPACED_ANNOTATION: &str = "nodeport-proxy.k8s.io/expose-namespaced";
const OAUTH_CLIENT_CRD: &str = "OAuthClient,oauth.openshift.io/v1";
const LOGIN_TEMPLATE_KEY: &str = "login.html";
const PROVIDER_SELECTION_TEMPLATE_KEY: &str = "providers.html";
const ERROR_TEMPLATE_KEY: &str = "errors.html";
const LOGIN_TEMPLATE: &str = indoc! {r#"
    <!DOCTYPE html>
    <html>
      <head><title>Log in</title></head>
      <body>
        {{ if .Error }}<p>{{ .Error }}</p>{{ end }}
        <form action="{{ .Action }}" method="POST">
          <input type="hidden" name="{{ .Names.Then }}" value="{{ .Values.Then }}">
          <input type="hidden" name="{{ .Names.CSRF }}" value="{{ .Values.CSRF }}">
          <input type="text" name="{{ .Names.Username }}" value="{{ .Values.Username }}" autofocus>
          <input type="password" name="{{ .Names.Password }}">
          <button type="submit">Log in</button>
        </form>
      </body>
    </html>
"#};
const PROVIDER_SELECTION_TEMPLATE: &str = indoc! {r#"
    <!DOCTYPE html>
    <html>
      <head><title>Log in with</title></head>
      <body>
        <ul>
          {{ range $provider := .Providers }}
          <li><a href="{{ $provider.URL }}">{{ $provider.Name }}</a></li>
          {{ end }}
        </ul>
      </body>
    </html>
"#};
const ERROR_TEMPLATE: &str = indoc! {r#"
    <!DOCTYPE html>
    <html>
      <head><title>Error</title></head>
      <body>
        <p>{{ .Error }}</p>
      </body>
    </html>
"#};
/// Max key size of HMAC SHA256.
const AUTHENTICATION_SECRET_LENGTH: usize = 64;
/// Max key size of AES-256.
const ENCRYPTION_SECRET_LENGTH: usize = 32;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to build object metadata"))]
    BuildMetadata { source: resource::Error },

    #[snafu(display("the {OAUTH_NAME} service has no node port yet"))]
    MissingNodePort,

    #[snafu(display("failed to serialize {what}"))]
    Serialize {
        source: serde_json::Error,
        what: &'static str,
    },

    #[snafu(display("failed to build ConfigMap {OAUTH_NAME}"))]
    BuildConfigMap {
        source: stackable_operator::builder::configmap::Error,
    },

    #[snafu(display("failed to resolve the hypershift image"))]
    ResolveImage { source: images::Error },

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

fn metadata(data: &ControlPlaneData, name: &str) -> Result<ObjectMeta> {
    cluster_object_meta(data.cluster, name, base_app_labels(OAUTH_NAME, [])).context(BuildMetadataSnafu)
}

/// The `OsinServerConfig`. Needs the node port of the OAuth service, because that is where
/// browsers reach the server.
pub fn config_map(data: &ControlPlaneData) -> Result<ConfigMap> {
    let node_port = data.oauth_node_port.context(MissingNodePortSnafu)?;
    let address = data
        .cluster
        .status
        .as_ref()
        .map(|status| status.address.clone())
        .unwrap_or_default();

    let config = json!({
        "admission": {},
        "apiVersion": "osin.config.openshift.io/v1",
        "auditConfig": {
            "auditFilePath": "",
            "enabled": false,
            "logFormat": "",
            "maximumFileRetentionDays": 0,
            "maximumFileSizeMegabytes": 0,
            "maximumRetainedFiles": 0,
            "policyConfiguration": null,
            "policyFile": "",
            "webHookKubeConfig": "",
            "webHookMode": ""
        },
        "corsAllowedOrigins": null,
        "kind": "OsinServerConfig",
        "kubeClientConfig": {
            "connectionOverrides": {
                "acceptContentTypes": "",
                "burst": 400,
                "contentType": "",
                "qps": 400
            },
            "kubeConfig": "/etc/kubernetes/kubeconfig/kubeconfig"
        },
        "oauthConfig": {
            "alwaysShowProviderSelection": false,
            "grantConfig": {
                "method": "deny",
                "serviceAccountMethod": "prompt"
            },
            "identityProviders": [],
            "loginURL": address.url,
            "masterCA": "/var/config/system/configmaps/v4-0-config-system-service-ca/service-ca.crt",
            "masterPublicURL": format!("https://{}:{node_port}", address.external_name),
            "masterURL": format!("https://{OAUTH_NAME}.{}", address.internal_name),
            "sessionConfig": {
                "sessionMaxAgeSeconds": 300,
                "sessionName": "ssn",
                "sessionSecretsFile": format!("/etc/{SESSION_SECRET_NAME}/{SESSION_SECRET_NAME}")
            },
            "templates": {
                "error": format!("/var/config/system/secrets/{OCP_BRANDING_SECRET_NAME}/errors.html"),
                "login": format!("/var/config/system/secrets/{OCP_BRANDING_SECRET_NAME}/login.html"),
                "providerSelection": format!("/var/config/system/secrets/{OCP_BRANDING_SECRET_NAME}/providers.html")
            },
            "tokenConfig": {
                "accessTokenMaxAgeSeconds": 86400,
                "authorizeTokenMaxAgeSeconds": 300
            }
        },
        "servingInfo": {
            "bindAddress": format!("0.0.0.0:{SERVING_PORT}"),
            "bindNetwork": "tcp4",
            "cipherSuites": [
                "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305",
                "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305",
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
                "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
                "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
                "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256",
                "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256",
                "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
                "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
                "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
                "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
                "TLS_RSA_WITH_AES_128_GCM_SHA256",
                "TLS_RSA_WITH_AES_256_GCM_SHA384",
                "TLS_RSA_WITH_AES_128_CBC_SHA",
                "TLS_RSA_WITH_AES_256_CBC_SHA"
            ],
            "certFile": "/etc/servingcert/serving.crt",
            "keyFile": "/etc/servingcert/serving.key",
            "maxRequestsInFlight": 1000,
            "minTLSVersion": "VersionTLS12",
            "namedCertificates": [],
            "requestTimeoutSeconds": 300
        },
        "storageConfig": {
            "ca": "",
            "certFile": "",
            "keyFile": "",
            "storagePrefix": ""
        }
    });
    let config = serde_json::to_string_pretty(&config).context(SerializeSnafu {
        what: "OsinServerConfig",
    })?;

    ConfigMapBuilder::new()
        .metadata(metadata(data, OAUTH_NAME)?)
        .add_data(CONFIG_KEY, config)
        .build()
        .context(BuildConfigMapSnafu)
}

/// NodePort service in front of the OAuth server. The nodeport-proxy picks it up through the
/// expose annotation matching the cluster's expose strategy.
pub fn service(data: &ControlPlaneData) -> Result<Service> {
    let mut metadata = metadata(data, OAUTH_NAME)?;
    let expose_annotation = match data.cluster.spec.expose_strategy {
        ExposeStrategy::NodePort => NODEPORT_PROXY_EXPOSE_ANNOTATION,
        ExposeStrategy::LoadBalancer => NODEPORT_PROXY_EXPOSE_NAMESPACED_ANNOTATION,
    };
    metadata.annotations = Some(BTreeMap::from([(
        expose_annotation.to_string(),
        "true".to_string(),
    )]));

    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(BTreeMap::from([(
                APP_LABEL_KEY.to_string(),
                OAUTH_NAME.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some(OAUTH_NAME.to_string()),
                port: 443,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(SERVING_PORT)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSecrets {
    api_version: &'static str,
    kind: &'static str,
    /// New sessions use the first entry; older entries still decrypt existing sessions.
    secrets: Vec<SessionSecret>,
}

#[derive(Debug, Serialize)]
struct SessionSecret {
    authentication: String,
    encryption: String,
}

/// URL safe random string without padding, so it never contains `/` or `=`.
fn random_string(length: usize) -> String {
    let mut bytes = vec![0u8; length * 3 / 4 + 1];
    OsRng.fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.truncate(length);
    encoded
}

fn new_session_secrets() -> Result<Vec<u8>> {
    let secrets = SessionSecrets {
        api_version: "v1",
        kind: "SessionSecrets",
        secrets: vec![SessionSecret {
            authentication: random_string(AUTHENTICATION_SECRET_LENGTH),
            encryption: random_string(ENCRYPTION_SECRET_LENGTH),
        }],
    };
    serde_json::to_vec(&secrets).context(SerializeSnafu {
        what: "SessionSecrets",
    })
}

/// Keys used to sign and encrypt session cookies. Secrets already present in `existing` are
/// kept, otherwise every login session would be invalidated on each reconcile.
pub fn session_secret(data: &ControlPlaneData, existing: Option<&Secret>) -> Result<Secret> {
    let current = existing
        .and_then(|secret| secret.data.as_ref())
        .and_then(|data| data.get(SESSION_SECRET_NAME))
        .filter(|value| !value.0.is_empty())
        .cloned();
    let value = match current {
        Some(value) => value,
        None => ByteString(new_session_secrets()?),
    };

    Ok(Secret {
        metadata: metadata(data, SESSION_SECRET_NAME)?,
        data: Some(BTreeMap::from([(SESSION_SECRET_NAME.to_string(), value)])),
        ..Secret::default()
    })
}

/// Pages the OAuth server renders with Go templates.
pub fn ocp_branding_secret(data: &ControlPlaneData) -> Result<Secret> {
    let pages = [
        (LOGIN_TEMPLATE_KEY, LOGIN_TEMPLATE),
        (PROVIDER_SELECTION_TEMPLATE_KEY, PROVIDER_SELECTION_TEMPLATE),
        (ERROR_TEMPLATE_KEY, ERROR_TEMPLATE),
    ];
    Ok(Secret {
        metadata: metadata(data, OCP_BRANDING_SECRET_NAME)?,
        data: Some(
            pages
                .into_iter()
                .map(|(key, page)| (key.to_string(), ByteString(page.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    })
}

fn resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("10m".to_string())),
            ("memory".to_string(), Quantity("50Mi".to_string())),
        ])),
        ..ResourceRequirements::default()
    }
}

/// Volumes of the `openshift-oauth` pods.
pub fn volumes() -> Vec<Volume> {
    let mut config_volume = config_map_volume(OAUTH_NAME, None);
    config_volume.name = CONFIG_VOLUME_NAME.to_string();
    vec![
        config_volume,
        secret_volume(INTERNAL_ADMIN_KUBECONFIG_SECRET_NAME, None),
        secret_volume(SESSION_SECRET_NAME, None),
        secret_volume(OCP_BRANDING_SECRET_NAME, None),
        secret_volume(SERVING_CERT_SECRET_NAME, None),
    ]
}

/// The `openshift-oauth` Deployment.
pub fn deployment(data: &ControlPlaneData) -> Result<Deployment> {
    let cluster_name = data.cluster_name();
    let image = images::hypershift_image(data.version(), data.overwrite_registry)
        .context(ResolveImageSnafu)?;

    let mut liveness_probe = https_probe("/healthz", SERVING_PORT);
    liveness_probe.timeout_seconds = Some(1);
    liveness_probe.initial_delay_seconds = Some(30);
    let mut readiness_probe = https_probe("/healthz", SERVING_PORT);
    readiness_probe.timeout_seconds = Some(1);

    let mut cb_oauth = ContainerBuilder::new(OAUTH_NAME)
        .context(InvalidContainerNameSnafu { name: OAUTH_NAME })?;
    cb_oauth
        .image(image)
        .command(
            [
                "hypershift",
                "openshift-osinserver",
                "--config=/etc/oauth/config.yaml",
                "--v=2",
            ]
            .map(String::from)
            .to_vec(),
        )
        .add_env_var("KUBECONFIG", "/etc/kubernetes/kubeconfig/kubeconfig")
        .liveness_probe(liveness_probe)
        .readiness_probe(readiness_probe)
        .resources(resources());
    for (volume, mount_path) in [
        (CONFIG_VOLUME_NAME, "/etc/oauth".to_string()),
        (
            INTERNAL_ADMIN_KUBECONFIG_SECRET_NAME,
            "/etc/kubernetes/kubeconfig".to_string(),
        ),
        (SESSION_SECRET_NAME, format!("/etc/{SESSION_SECRET_NAME}")),
        (
            OCP_BRANDING_SECRET_NAME,
            format!("/var/config/system/secrets/{OCP_BRANDING_SECRET_NAME}"),
        ),
        (SERVING_CERT_SECRET_NAME, "/etc/servingcert".to_string()),
    ] {
        cb_oauth
            .add_volume_mount(volume, mount_path)
            .context(AddVolumeMountSnafu)?;
    }
    let mut oauth = cb_oauth.build();
    for mount in oauth.volume_mounts.iter_mut().flatten() {
        if mount.name == INTERNAL_ADMIN_KUBECONFIG_SECRET_NAME {
            mount.read_only = Some(true);
        }
    }

    let volumes = volumes();
    let labels = pod_template_labels(OAUTH_NAME, &cluster_name, &volumes, &data.revisions)
        .context(PodTemplateLabelsSnafu)?;

    let mut pod_builder = PodBuilder::new();
    pod_builder
        .metadata(ObjectMeta {
            labels: Some(labels),
            ..ObjectMeta::default()
        })
        .add_init_container(apiserver_running_init_container(
            data.prober_image,
            &data.namespace(),
            Some(OAUTH_CLIENT_CRD),
        ))
        .add_container(oauth);
    for volume in volumes {
        pod_builder.add_volume(volume).context(AddVolumeSnafu)?;
    }
    let mut template = pod_builder.build_template();
    let pod_spec = template.spec.get_or_insert_with(PodSpec::default);
    let mut pull_secret_names = vec![OPENSHIFT_IMAGE_PULL_SECRET_NAME];
    if data.docker_pull_secret {
        pull_secret_names.insert(0, IMAGE_PULL_SECRET_NAME);
    }
    pod_spec.image_pull_secrets = Some(pull_secrets(pull_secret_names));
    pod_spec.automount_service_account_token = Some(false);
    pod_spec.affinity = Some(hostname_anti_affinity(OAUTH_NAME, &cluster_name));

    Ok(Deployment {
        metadata: metadata(data, OAUTH_NAME)?,
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            selector: LabelSelector {
                match_labels: Some(base_app_labels(OAUTH_NAME, [])),
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
    use super::*;
    use crate::resource::{
        pod::VolumeRevisions,
        test_support::{cluster_from_yaml, OPENSHIFT_CLUSTER},
    };

    fn data(cluster: &crate::crd::cluster::v1::Cluster) -> ControlPlaneData<'_> {
        ControlPlaneData {
            cluster,
            overwrite_registry: "",
            prober_image: "quay.io/kubermatic/kubermatic:v2.14.0",
            docker_pull_secret: true,
            dns_resolver_ip: "10.240.16.19".to_string(),
            oauth_node_port: Some(30443),
            revisions: VolumeRevisions {
                secrets: [
                    INTERNAL_ADMIN_KUBECONFIG_SECRET_NAME,
                    SESSION_SECRET_NAME,
                    OCP_BRANDING_SECRET_NAME,
                    SERVING_CERT_SECRET_NAME,
                ]
                .iter()
                .map(|name| (name.to_string(), "7".to_string()))
                .collect(),
                config_maps: BTreeMap::from([(OAUTH_NAME.to_string(), "8".to_string())]),
            },
        }
    }

    #[test]
    fn test_config_urls() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let config_map = config_map(&data(&cluster)).unwrap();
        let config: serde_json::Value =
            serde_json::from_str(&config_map.data.unwrap()[CONFIG_KEY]).unwrap();

        let oauth = &config["oauthConfig"];
        assert_eq!(oauth["loginURL"], "https://os1.europe.example.com:31000");
        assert_eq!(oauth["masterPublicURL"], "https://os1.europe.example.com:30443");
        assert_eq!(
            oauth["masterURL"],
            "https://openshift-oauth.apiserver-external.cluster-os1.svc.cluster.local"
        );
        assert_eq!(config["servingInfo"]["cipherSuites"].as_array().unwrap().len(), 16);
    }

    #[test]
    fn test_config_needs_node_port() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let mut data = data(&cluster);
        data.oauth_node_port = None;
        assert!(matches!(config_map(&data), Err(Error::MissingNodePort)));
    }

    #[test]
    fn test_service_expose_annotation() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let service = service(&data(&cluster)).unwrap();
        assert_eq!(
            service.metadata.annotations.unwrap(),
            BTreeMap::from([(
                "nodeport-proxy.k8s.io/expose".to_string(),
                "true".to_string()
            )])
        );
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::Int(6443)));

        let cluster = cluster_from_yaml(
            &OPENSHIFT_CLUSTER.replace("exposeStrategy: NodePort", "exposeStrategy: LoadBalancer"),
        );
        let service = super::service(&data(&cluster)).unwrap();
        assert!(service
            .metadata
            .annotations
            .unwrap()
            .contains_key("nodeport-proxy.k8s.io/expose-namespaced"));
    }

    #[test]
    fn test_session_secret_is_generated_once() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let data = data(&cluster);

        let first = session_secret(&data, None).unwrap();
        let content: serde_json::Value =
            serde_json::from_slice(&first.data.as_ref().unwrap()[SESSION_SECRET_NAME].0).unwrap();
        assert_eq!(content["kind"], "SessionSecrets");
        let secret = &content["secrets"][0];
        assert_eq!(secret["authentication"].as_str().unwrap().len(), 64);
        assert_eq!(secret["encryption"].as_str().unwrap().len(), 32);

        let second = session_secret(&data, Some(&first)).unwrap();
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn test_random_string_is_url_safe() {
        for length in [1, 32, 64] {
            let value = random_string(length);
            assert_eq!(value.len(), length);
            assert!(!value.contains(['/', '+', '=']));
        }
    }

    #[test]
    fn test_deployment() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let deployment = deployment(&data(&cluster)).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));

        let labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels["openshift-oauth-configmap-revision"], "8");
        assert_eq!(labels["openshift-oauth-session-secret-secret-revision"], "7");

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.automount_service_account_token, Some(false));
        assert_eq!(
            pod.image_pull_secrets.unwrap(),
            pull_secrets([IMAGE_PULL_SECRET_NAME, OPENSHIFT_IMAGE_PULL_SECRET_NAME])
        );
        assert!(pod.affinity.is_some());
        let init = &pod.init_containers.unwrap()[0];
        assert!(init
            .args
            .as_ref()
            .unwrap()
            .contains(&"OAuthClient,oauth.openshift.io/v1".to_string()));

        let oauth = &pod.containers[0];
        assert_eq!(
            oauth.image.as_deref(),
            Some("quay.io/openshift-release-dev/ocp-v4.0-art-dev:v4.1.18-hypershift")
        );
        assert_eq!(oauth.resources, Some(resources()));
        assert_eq!(
            oauth.liveness_probe.as_ref().unwrap().initial_delay_seconds,
            Some(30)
        );
    }

    #[test]
    fn test_dockercfg_only_when_provided() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let mut data = data(&cluster);
        data.docker_pull_secret = false;

        let pod = deployment(&data).unwrap().spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.image_pull_secrets.unwrap(),
            pull_secrets([OPENSHIFT_IMAGE_PULL_SECRET_NAME])
        );
    }

    #[test]
    fn test_ocp_branding_secret() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let secret = ocp_branding_secret(&data(&cluster)).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some(OCP_BRANDING_SECRET_NAME));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("cluster-os1"));

        // Every page the OsinServerConfig points at is part of the secret.
        let pages = secret.data.unwrap();
        let config_map = config_map(&data(&cluster)).unwrap();
        let config: serde_json::Value =
            serde_json::from_str(&config_map.data.unwrap()[CONFIG_KEY]).unwrap();
        for template in ["error", "login", "providerSelection"] {
            let path = config["oauthConfig"]["templates"][template].as_str().unwrap();
            let (directory, key) = path.rsplit_once('/').unwrap();
            assert!(directory.ends_with(OCP_BRANDING_SECRET_NAME));
            assert!(!pages[key].0.is_empty(), "{key} is empty");
        }
        let login = String::from_utf8(pages[LOGIN_TEMPLATE_KEY].0.clone()).unwrap();
        assert!(login.contains("{{ .Names.CSRF }}"));
    }
}
