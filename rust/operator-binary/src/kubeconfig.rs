//! Access to user clusters through the kubeconfigs stored in their seed namespace.

use std::collections::BTreeMap;

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{
        config::{KubeConfigOptions, Kubeconfig},
        Api, Client, Config, ResourceExt,
    },
};

use crate::{
    crd::cluster::v1,
    resource::{ADMIN_KUBECONFIG_SECRET_NAME, KUBECONFIG_SECRET_KEY},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to get Secret {namespace}/{name}"))]
    GetSecret {
        source: stackable_operator::kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("Secret {namespace}/{name} has no key {key:?}"))]
    MissingKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[snafu(display("key {key:?} of Secret {namespace}/{name} is not valid UTF-8"))]
    InvalidUtf8 {
        source: std::string::FromUtf8Error,
        namespace: String,
        name: String,
        key: String,
    },

    #[snafu(display("failed to parse kubeconfig"))]
    ParseKubeconfig {
        source: stackable_operator::kube::config::KubeconfigError,
    },

    #[snafu(display("failed to build client config from kubeconfig"))]
    BuildConfig {
        source: stackable_operator::kube::config::KubeconfigError,
    },

    #[snafu(display("failed to build user cluster client"))]
    BuildClient {
        source: stackable_operator::kube::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn secret_string(secret: &Secret, key: &str) -> Result<String> {
    let namespace = secret.namespace().unwrap_or_default();
    let name = secret.name_any();
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .with_context(|| MissingKeySnafu {
            namespace: &namespace,
            name: &name,
            key,
        })?;
    String::from_utf8(value.0.clone()).context(InvalidUtf8Snafu {
        namespace,
        name,
        key,
    })
}

async fn get_secret(client: &Client, namespace: &str, name: &str) -> Result<Secret> {
    Api::<Secret>::namespaced(client.clone(), namespace)
        .get(name)
        .await
        .context(GetSecretSnafu { namespace, name })
}

/// The admin kubeconfig of the user cluster, as stored in its seed namespace.
pub async fn admin_kubeconfig(client: &Client, cluster: &v1::Cluster) -> Result<String> {
    let secret = get_secret(
        client,
        &cluster.namespace_name(),
        ADMIN_KUBECONFIG_SECRET_NAME,
    )
    .await?;
    secret_string(&secret, KUBECONFIG_SECRET_KEY)
}

/// All entries of the cloud credentials Secret referenced by the cluster, empty when the
/// cluster references none.
pub async fn credentials(
    client: &Client,
    cluster: &v1::Cluster,
) -> Result<BTreeMap<String, String>> {
    let Some(reference) = &cluster.spec.cloud.credentials_reference else {
        return Ok(BTreeMap::new());
    };
    let secret = get_secret(client, &reference.namespace, &reference.name).await?;
    secret
        .data
        .iter()
        .flatten()
        .map(|(key, _)| Ok((key.clone(), secret_string(&secret, key)?)))
        .collect()
}

/// A client talking to the user cluster described by `kubeconfig`.
pub async fn user_cluster_client(kubeconfig: &str) -> Result<Client> {
    let kubeconfig = Kubeconfig::from_yaml(kubeconfig).context(ParseKubeconfigSnafu)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context(BuildConfigSnafu)?;
    Client::try_from(config).context(BuildClientSnafu)
}
