//! Runs the OpenShift control plane of user clusters in their seed namespace.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use const_format::concatcp;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    builder::meta::ObjectMetaBuilder,
    client::GetApi,
    k8s_openapi::{
        api::{
            apps::v1::{Deployment, StatefulSet},
            core::v1::{ConfigMap, Namespace, Secret, Service},
        },
        NamespaceResourceScope,
    },
    kube::{
        api::{ListParams, Patch, PatchParams},
        core::{error_boundary, DeserializeGuard},
        runtime::controller::Action,
        Api, Resource, ResourceExt,
    },
    logging::controller::ReconcilerError,
    shared::time::Duration,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{
        cluster::{v1, ClusterStatus, ExtendedClusterHealth, HealthStatus},
        is_condition_true, now_rfc3339, update_condition, ConditionStatus, ConditionType,
        OPERATOR_NAME,
    },
    kubeconfig,
    openshift::{
        kube_controller_manager,
        oauth::{self, OAUTH_NAME},
        policy::{self, apply_policy},
        pull_secret, ControlPlaneData,
    },
    resource::{
        network::DNS_RESOLVER_SERVICE_NAME, pod::VolumeRevisions, APISERVER_DEPLOYMENT_NAME,
        CONTROLLER_MANAGER_DEPLOYMENT_NAME, ETCD_STATEFULSET_NAME,
        MACHINE_CONTROLLER_DEPLOYMENT_NAME, OPENVPN_SERVER_DEPLOYMENT_NAME,
        USER_CLUSTER_CONTROLLER_DEPLOYMENT_NAME,
    },
};

pub const OPENSHIFT_CONTROLLER_NAME: &str = "openshift";
pub const OPENSHIFT_FULL_CONTROLLER_NAME: &str =
    concatcp!(OPENSHIFT_CONTROLLER_NAME, '.', OPERATOR_NAME);

const REQUEUE: Duration = Duration::from_secs(10);
const DEPLOYMENT_MIN_READY: i32 = 1;
const ETCD_MIN_READY: i32 = 2;

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    pub overwrite_registry: String,
    /// `<image>:<tag>` of the image providing the `http-prober`.
    pub prober_image: String,
    /// Docker config JSON for the `dockercfg` pull secret, if the seed provides one.
    pub docker_pull_config: Option<String>,
    pub worker_name: String,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("Cluster object is invalid"))]
    InvalidCluster {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("failed to build metadata of Namespace {name}"))]
    BuildNamespaceMetadata {
        source: stackable_operator::builder::meta::Error,
        name: String,
    },

    #[snafu(display("failed to apply {kind} {name}"))]
    ApplyObject {
        source: stackable_operator::client::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to get {kind} {name}"))]
    GetObject {
        source: stackable_operator::kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to list {kind} in namespace {namespace}"))]
    ListObjects {
        source: stackable_operator::kube::Error,
        kind: &'static str,
        namespace: String,
    },

    #[snafu(display("failed to default the network of Cluster {name}"))]
    PatchNetwork {
        source: stackable_operator::kube::Error,
        name: String,
    },

    #[snafu(display("failed to update status of Cluster {name}"))]
    PatchStatus {
        source: stackable_operator::kube::Error,
        name: String,
    },

    #[snafu(display("failed to build the image pull secrets"))]
    BuildPullSecret { source: pull_secret::Error },

    #[snafu(display("failed to build the OAuth server objects"))]
    BuildOauth { source: oauth::Error },

    #[snafu(display("failed to build the controller-manager objects"))]
    BuildControllerManager {
        source: kube_controller_manager::Error,
    },

    #[snafu(display("the {OAUTH_NAME} service has no node port yet"))]
    OauthNodePortMissing,

    #[snafu(display("the {DNS_RESOLVER_SERVICE_NAME} service in {namespace} has no cluster IP"))]
    DnsResolverIpMissing { namespace: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile_cluster(
    cluster: Arc<DeserializeGuard<v1::Cluster>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile");

    let cluster = cluster
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidClusterSnafu)?;
    let cluster_name = cluster.name_any();

    if !cluster.is_openshift() {
        return Ok(Action::await_change());
    }
    if cluster.spec.pause {
        tracing::debug!(cluster = cluster_name, "Cluster is paused, skipping");
        return Ok(Action::await_change());
    }
    if !cluster.handled_by_worker(&ctx.worker_name) {
        tracing::debug!(
            cluster = cluster_name,
            worker_name = ctx.worker_name,
            "Cluster belongs to another worker, skipping"
        );
        return Ok(Action::await_change());
    }
    if cluster.metadata.deletion_timestamp.is_some() {
        tracing::debug!(cluster = cluster_name, "Cluster is being deleted, waiting");
        return Ok(Action::requeue(*REQUEUE));
    }

    let original_status = cluster.status.clone().unwrap_or_default();
    let mut status = original_status.clone();
    let result = reconcile_control_plane(cluster, &ctx, &mut status).await;

    let (condition_status, message) = match &result {
        Ok(_) => (ConditionStatus::True, String::new()),
        Err(error) => (ConditionStatus::False, error.to_string()),
    };
    update_condition(
        &mut status.conditions,
        ConditionType::OpenshiftControllerReconcilingSuccess,
        condition_status,
        "",
        &message,
        &now_rfc3339(),
    );
    if status != original_status {
        patch_status(&ctx, cluster, &status).await?;
    }

    result
}

async fn reconcile_control_plane(
    cluster: &v1::Cluster,
    ctx: &Ctx,
    status: &mut ClusterStatus,
) -> Result<Action> {
    let cluster_name = cluster.name_any();
    let namespace = cluster.namespace_name();

    ensure_namespace(ctx, cluster, &namespace).await?;
    status.namespace_name = namespace.clone();
    default_network(ctx, cluster).await?;

    let mut data = ControlPlaneData {
        cluster,
        overwrite_registry: &ctx.overwrite_registry,
        prober_image: &ctx.prober_image,
        docker_pull_secret: ctx.docker_pull_config.is_some(),
        dns_resolver_ip: String::new(),
        oauth_node_port: None,
        revisions: VolumeRevisions::default(),
    };

    // Secrets
    apply(
        ctx,
        &pull_secret::openshift_image_pull_secret(&data).context(BuildPullSecretSnafu)?,
    )
    .await?;
    if let Some(docker_config) = &ctx.docker_pull_config {
        apply(
            ctx,
            &pull_secret::image_pull_secret(&data, docker_config).context(BuildPullSecretSnafu)?,
        )
        .await?;
    }
    let existing_session_secret =
        get_namespaced::<Secret>(ctx, &namespace, oauth::SESSION_SECRET_NAME).await?;
    apply(
        ctx,
        &oauth::session_secret(&data, existing_session_secret.as_ref())
            .context(BuildOauthSnafu)?,
    )
    .await?;
    apply(
        ctx,
        &oauth::ocp_branding_secret(&data).context(BuildOauthSnafu)?,
    )
    .await?;

    // Services
    let oauth_service = apply(ctx, &oauth::service(&data).context(BuildOauthSnafu)?).await?;
    data.oauth_node_port = Some(oauth_node_port(&oauth_service).context(OauthNodePortMissingSnafu)?);

    // ConfigMaps
    apply(
        ctx,
        &kube_controller_manager::config_map(&data).context(BuildControllerManagerSnafu)?,
    )
    .await?;
    apply(ctx, &oauth::config_map(&data).context(BuildOauthSnafu)?).await?;

    // Deployments
    data.revisions = volume_revisions(ctx, &namespace).await?;
    data.dns_resolver_ip = dns_resolver_ip(ctx, &namespace).await?;
    let deployments = build_deployments(&data)?;
    for deployment in &deployments.ready {
        apply(ctx, deployment).await?;
    }
    for (name, missing) in &deployments.pending {
        tracing::info!(
            cluster = cluster_name,
            deployment = name,
            ?missing,
            "Deployment waits for mounted objects, trying again in {REQUEUE}"
        );
    }

    let initialized = is_condition_true(&status.conditions, ConditionType::ClusterInitialized);
    status.extended_health = extended_health(ctx, &namespace, initialized).await?;

    if initialized {
        return Ok(settled_action(
            status.extended_health.all_healthy(),
            &deployments,
        ));
    }
    if status.extended_health.apiserver != HealthStatus::Up {
        tracing::debug!(
            cluster = cluster_name,
            "API server is not running yet, trying again in {REQUEUE}"
        );
        return Ok(Action::requeue(*REQUEUE));
    }

    if let Err(error) = initialize_user_cluster(ctx, cluster).await {
        tracing::info!(
            cluster = cluster_name,
            error = &error as &dyn std::error::Error,
            "User cluster is not reachable yet, trying again in {REQUEUE}"
        );
        return Ok(Action::requeue(*REQUEUE));
    }
    update_condition(
        &mut status.conditions,
        ConditionType::ClusterInitialized,
        ConditionStatus::True,
        "",
        "",
        &now_rfc3339(),
    );
    tracing::info!(cluster = cluster_name, "Initialized user cluster");
    Ok(settled_action(true, &deployments))
}

/// The Deployments this controller owns, split by whether everything they mount exists.
/// Certificates and kubeconfigs come from other controllers of the seed, so a missing one
/// delays a single Deployment instead of failing the reconcile.
#[derive(Debug, Default)]
struct ControlPlaneDeployments {
    ready: Vec<Deployment>,
    /// Deployment name to the Secrets and ConfigMaps it still waits for.
    pending: BTreeMap<&'static str, Vec<String>>,
}

fn build_deployments(data: &ControlPlaneData) -> Result<ControlPlaneDeployments> {
    let mut deployments = ControlPlaneDeployments::default();

    let missing = data.revisions.missing(&kube_controller_manager::volumes());
    if missing.is_empty() {
        deployments.ready.push(
            kube_controller_manager::deployment(data).context(BuildControllerManagerSnafu)?,
        );
    } else {
        deployments
            .pending
            .insert(CONTROLLER_MANAGER_DEPLOYMENT_NAME, missing);
    }

    let missing = data.revisions.missing(&oauth::volumes());
    if missing.is_empty() {
        deployments
            .ready
            .push(oauth::deployment(data).context(BuildOauthSnafu)?);
    } else {
        deployments.pending.insert(OAUTH_NAME, missing);
    }

    Ok(deployments)
}

/// Components deployed by other controllers are not watched, so poll until all are up and
/// every Deployment could be applied.
fn settled_action(all_healthy: bool, deployments: &ControlPlaneDeployments) -> Action {
    if all_healthy && deployments.pending.is_empty() {
        Action::await_change()
    } else {
        Action::requeue(*REQUEUE)
    }
}

#[derive(Snafu, Debug)]
enum InitializeError {
    #[snafu(display("failed to connect to the user cluster"))]
    Connect { source: kubeconfig::Error },

    #[snafu(display("failed to apply the RBAC policy"))]
    ApplyPolicy { source: policy::Error },
}

/// Applies the bootstrap RBAC policy to the user cluster.
async fn initialize_user_cluster(
    ctx: &Ctx,
    cluster: &v1::Cluster,
) -> Result<(), InitializeError> {
    let kubeconfig = kubeconfig::admin_kubeconfig(&ctx.client.as_kube_client(), cluster)
        .await
        .context(ConnectSnafu)?;
    let user_client = kubeconfig::user_cluster_client(&kubeconfig)
        .await
        .context(ConnectSnafu)?;
    apply_policy(&user_client, OPENSHIFT_FULL_CONTROLLER_NAME)
        .await
        .context(ApplyPolicySnafu)
}

async fn apply<T>(ctx: &Ctx, object: &T) -> Result<T>
where
    T: Clone + Debug + DeserializeOwned + Resource<DynamicType = ()> + GetApi + Serialize,
{
    ctx.client
        .apply_patch(OPENSHIFT_CONTROLLER_NAME, object, object)
        .await
        .with_context(|_| ApplyObjectSnafu {
            kind: T::kind(&()).to_string(),
            name: object.name_any(),
        })
}

async fn get_namespaced<T>(ctx: &Ctx, namespace: &str, name: &str) -> Result<Option<T>>
where
    T: Clone
        + Debug
        + DeserializeOwned
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    Api::<T>::namespaced(ctx.client.as_kube_client(), namespace)
        .get_opt(name)
        .await
        .with_context(|_| GetObjectSnafu {
            kind: T::kind(&()).to_string(),
            name: format!("{namespace}/{name}"),
        })
}

/// The cluster namespace, owned by the Cluster so that deleting the Cluster removes its
/// control plane.
async fn ensure_namespace(ctx: &Ctx, cluster: &v1::Cluster, name: &str) -> Result<()> {
    let namespace = Namespace {
        metadata: ObjectMetaBuilder::new()
            .name(name)
            .ownerreference_from_resource(cluster, None, Some(true))
            .context(BuildNamespaceMetadataSnafu { name })?
            .build(),
        ..Namespace::default()
    };
    apply(ctx, &namespace).await?;
    Ok(())
}

/// Persists the seed network defaults into the Cluster, the user cluster components read them
/// from there.
async fn default_network(ctx: &Ctx, cluster: &v1::Cluster) -> Result<()> {
    let network = cluster.network_with_defaults();
    if network == cluster.spec.cluster_network {
        return Ok(());
    }
    let name = cluster.name_any();
    Api::<v1::Cluster>::all(ctx.client.as_kube_client())
        .patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "spec": { "clusterNetwork": network } })),
        )
        .await
        .context(PatchNetworkSnafu { name: &name })?;
    tracing::info!(cluster = name, "Applied network defaults");
    Ok(())
}

async fn patch_status(ctx: &Ctx, cluster: &v1::Cluster, status: &ClusterStatus) -> Result<()> {
    let name = cluster.name_any();
    Api::<v1::Cluster>::all(ctx.client.as_kube_client())
        .patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(json!({
                "status": {
                    "namespaceName": status.namespace_name,
                    "extendedHealth": status.extended_health,
                    "conditions": status.conditions,
                }
            })),
        )
        .await
        .context(PatchStatusSnafu { name })?;
    Ok(())
}

fn oauth_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find_map(|port| port.node_port)
}

/// Resource versions of every Secret and ConfigMap in the cluster namespace. Pod templates
/// carry them as labels.
async fn volume_revisions(ctx: &Ctx, namespace: &str) -> Result<VolumeRevisions> {
    let kube_client = ctx.client.as_kube_client();
    let secrets = Api::<Secret>::namespaced(kube_client.clone(), namespace)
        .list(&ListParams::default())
        .await
        .context(ListObjectsSnafu {
            kind: "Secret",
            namespace,
        })?;
    let config_maps = Api::<ConfigMap>::namespaced(kube_client, namespace)
        .list(&ListParams::default())
        .await
        .context(ListObjectsSnafu {
            kind: "ConfigMap",
            namespace,
        })?;

    Ok(VolumeRevisions {
        secrets: revisions(secrets.items.iter()),
        config_maps: revisions(config_maps.items.iter()),
    })
}

fn revisions<'a, T: Resource + 'a>(objects: impl Iterator<Item = &'a T>) -> BTreeMap<String, String> {
    objects
        .filter_map(|object| Some((object.name_any(), object.resource_version()?)))
        .collect()
}

async fn dns_resolver_ip(ctx: &Ctx, namespace: &str) -> Result<String> {
    get_namespaced::<Service>(ctx, namespace, DNS_RESOLVER_SERVICE_NAME)
        .await?
        .and_then(|service| service.spec?.cluster_ip)
        .filter(|ip| !ip.is_empty() && ip != "None")
        .context(DnsResolverIpMissingSnafu { namespace })
}

fn health_status(ready: bool, initialized: bool) -> HealthStatus {
    match (ready, initialized) {
        (true, _) => HealthStatus::Up,
        (false, false) => HealthStatus::Provisioning,
        (false, true) => HealthStatus::Down,
    }
}

fn deployment_ready(deployment: Option<&Deployment>) -> bool {
    deployment
        .and_then(|deployment| deployment.status.as_ref()?.ready_replicas)
        .is_some_and(|ready| ready >= DEPLOYMENT_MIN_READY)
}

fn stateful_set_ready(stateful_set: Option<&StatefulSet>) -> bool {
    stateful_set
        .and_then(|stateful_set| stateful_set.status.as_ref()?.ready_replicas)
        .is_some_and(|ready| ready >= ETCD_MIN_READY)
}

/// Health of the control-plane components. Components that are not ready count as
/// provisioning until the cluster has been initialized once.
async fn extended_health(
    ctx: &Ctx,
    namespace: &str,
    initialized: bool,
) -> Result<ExtendedClusterHealth> {
    let mut deployment_health = BTreeMap::new();
    for name in [
        APISERVER_DEPLOYMENT_NAME,
        CONTROLLER_MANAGER_DEPLOYMENT_NAME,
        MACHINE_CONTROLLER_DEPLOYMENT_NAME,
        OPENVPN_SERVER_DEPLOYMENT_NAME,
        USER_CLUSTER_CONTROLLER_DEPLOYMENT_NAME,
    ] {
        let deployment = get_namespaced::<Deployment>(ctx, namespace, name).await?;
        deployment_health.insert(
            name,
            health_status(deployment_ready(deployment.as_ref()), initialized),
        );
    }
    let etcd = get_namespaced::<StatefulSet>(ctx, namespace, ETCD_STATEFULSET_NAME).await?;

    let health_of = |name: &str| {
        deployment_health
            .get(name)
            .copied()
            .unwrap_or(HealthStatus::Down)
    };
    let controller = health_of(CONTROLLER_MANAGER_DEPLOYMENT_NAME);
    Ok(ExtendedClusterHealth {
        apiserver: health_of(APISERVER_DEPLOYMENT_NAME),
        // The OpenShift controller-manager runs the scheduler as well.
        scheduler: controller,
        controller,
        machine_controller: health_of(MACHINE_CONTROLLER_DEPLOYMENT_NAME),
        etcd: health_status(stateful_set_ready(etcd.as_ref()), initialized),
        openvpn: health_of(OPENVPN_SERVER_DEPLOYMENT_NAME),
        user_cluster_controller_manager: health_of(USER_CLUSTER_CONTROLLER_DEPLOYMENT_NAME),
    })
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<v1::Cluster>>,
    error: &Error,
    _ctx: Arc<Ctx>,
) -> Action {
    match error {
        Error::InvalidCluster { .. } => Action::await_change(),
        _ => Action::requeue(*REQUEUE),
    }
}
