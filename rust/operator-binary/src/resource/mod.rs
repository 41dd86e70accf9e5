//! Names, labels and metadata shared by all control-plane objects of a user cluster.

pub mod network;
pub mod pod;

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{builder::meta::ObjectMetaBuilder, kube::core::ObjectMeta};

use crate::crd::cluster::v1;

pub const APP_LABEL_KEY: &str = "app";
pub const CLUSTER_LABEL_KEY: &str = "cluster";

pub const CONTROLLER_MANAGER_DEPLOYMENT_NAME: &str = "controller-manager";
pub const APISERVER_DEPLOYMENT_NAME: &str = "apiserver";
pub const MACHINE_CONTROLLER_DEPLOYMENT_NAME: &str = "machine-controller";
pub const OPENVPN_SERVER_DEPLOYMENT_NAME: &str = "openvpn-server";
pub const USER_CLUSTER_CONTROLLER_DEPLOYMENT_NAME: &str = "usercluster-controller";
pub const ETCD_STATEFULSET_NAME: &str = "etcd";

pub const ADMIN_KUBECONFIG_SECRET_NAME: &str = "admin-kubeconfig";
pub const INTERNAL_ADMIN_KUBECONFIG_SECRET_NAME: &str = "internal-admin-kubeconfig";
pub const CONTROLLER_MANAGER_KUBECONFIG_SECRET_NAME: &str = "controllermanager-kubeconfig";
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";
pub const IMAGE_PULL_SECRET_NAME: &str = "dockercfg";
pub const CA_SECRET_NAME: &str = "ca";
pub const FRONT_PROXY_CA_SECRET_NAME: &str = "front-proxy-ca";
pub const SERVICE_ACCOUNT_KEY_SECRET_NAME: &str = "service-account-key";
pub const OPENVPN_CLIENT_CERTIFICATES_SECRET_NAME: &str = "openvpn-client-certificates";
pub const CLOUD_CONFIG_CONFIGMAP_NAME: &str = "cloud-config";

pub const DEFAULT_OWNER_READ_ONLY_MODE: i32 = 0o400;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },
}

/// `app: <name>` plus the given extra labels. Extra labels win on conflict.
pub fn base_app_labels(
    name: &str,
    extra: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(APP_LABEL_KEY.to_string(), name.to_string())]);
    labels.extend(extra);
    labels
}

/// Base app labels plus the `cluster` label, used on pod templates.
pub fn app_cluster_labels(
    name: &str,
    cluster_name: &str,
    extra: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    let mut labels = base_app_labels(name, extra);
    labels.insert(CLUSTER_LABEL_KEY.to_string(), cluster_name.to_string());
    labels
}

/// Metadata for an object living in the cluster namespace, owned by the [`v1::Cluster`].
pub fn cluster_object_meta(
    cluster: &v1::Cluster,
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
) -> Result<ObjectMeta, Error> {
    let mut metadata = ObjectMetaBuilder::new()
        .name(name)
        .namespace(cluster.namespace_name())
        .ownerreference_from_resource(cluster, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .build();
    if !labels.is_empty() {
        metadata.labels = Some(labels);
    }
    Ok(metadata)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::crd::cluster::v1;

    pub fn cluster_from_yaml(input: &str) -> v1::Cluster {
        let mut cluster: v1::Cluster = serde_yaml::from_str(input).expect("illegal test input");
        // Owner references need a UID.
        cluster
            .metadata
            .uid
            .get_or_insert_with(|| "c0ffee00-0000-0000-0000-000000000000".to_string());
        cluster
    }

    pub const OPENSHIFT_CLUSTER: &str = r#"
        apiVersion: kubermatic.k8s.io/v1
        kind: Cluster
        metadata:
          name: os1
        spec:
          version: 4.1.18
          cloud:
            dc: europe-west3-c
            aws: {}
          exposeStrategy: NodePort
          openshift:
            imagePullSecret: '{"auths":{}}'
          clusterNetwork:
            services:
              cidrBlocks: ["10.240.16.0/20"]
            pods:
              cidrBlocks: ["172.25.0.0/16"]
            dnsDomain: cluster.local
        status:
          namespaceName: cluster-os1
          address:
            externalName: os1.europe.example.com
            internalName: apiserver-external.cluster-os1.svc.cluster.local
            url: https://os1.europe.example.com:31000
            port: 31000
        "#;
}

#[cfg(test)]
mod tests {
    use super::{test_support::*, *};

    #[test]
    fn test_cluster_object_meta() {
        let cluster = cluster_from_yaml(OPENSHIFT_CLUSTER);
        let meta = cluster_object_meta(
            &cluster,
            CONTROLLER_MANAGER_DEPLOYMENT_NAME,
            base_app_labels(CONTROLLER_MANAGER_DEPLOYMENT_NAME, []),
        )
        .unwrap();

        assert_eq!(meta.name.as_deref(), Some("controller-manager"));
        assert_eq!(meta.namespace.as_deref(), Some("cluster-os1"));
        let owner = &meta.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "Cluster");
        assert_eq!(owner.name, "os1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(
            meta.labels.unwrap().get(APP_LABEL_KEY).map(String::as_str),
            Some("controller-manager")
        );
    }

    #[test]
    fn test_extra_labels_override_app() {
        let labels = app_cluster_labels(
            "openshift-oauth",
            "os1",
            [("app".to_string(), "custom".to_string())],
        );
        assert_eq!(labels.get("app").map(String::as_str), Some("custom"));
        assert_eq!(labels.get("cluster").map(String::as_str), Some("os1"));
    }
}
