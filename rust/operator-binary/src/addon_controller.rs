//! Installs addons into user clusters and keeps them installed.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use const_format::concatcp;
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    kube::{
        api::{DynamicObject, ListParams, Patch, PatchParams},
        core::{error_boundary, DeserializeGuard, GroupVersionKind as KubeGroupVersionKind},
        discovery,
        runtime::controller::Action,
        Api, ResourceExt,
    },
    logging::controller::ReconcilerError,
    shared::time::Duration,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    addon::{
        self,
        kubectl::{self, KubectlAction},
        template::{self, TemplateData},
    },
    crd::{
        addon::{v1 as addon_v1, AddonStatus, GroupVersionKind},
        cluster::v1,
        now_rfc3339, set_condition, update_condition, Condition, ConditionStatus, ConditionType,
        OPERATOR_NAME,
    },
    kubeconfig,
    resource::network,
};

pub const ADDON_CONTROLLER_NAME: &str = "addon";
pub const ADDON_FULL_CONTROLLER_NAME: &str = concatcp!(ADDON_CONTROLLER_NAME, '.', OPERATOR_NAME);

/// Delay before checking again on a cluster that is not ready for addons yet.
const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    /// Root directory with one sub-directory per addon.
    pub addons_path: PathBuf,
    pub overwrite_registry: String,
    /// Operator wide variables per addon name.
    pub addon_variables: BTreeMap<String, serde_json::Value>,
    /// Re-apply interval for installed addons, `None` disables re-applying.
    pub enforce_interval: Option<Duration>,
    pub node_local_dns_cache_address: String,
    pub worker_name: String,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("Addon object is invalid"))]
    InvalidAddon {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("Addon object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to get Cluster {name}"))]
    GetCluster {
        source: stackable_operator::kube::Error,
        name: String,
    },

    #[snafu(display("failed to update finalizers of Addon {name}"))]
    PatchFinalizers {
        source: stackable_operator::kube::Error,
        name: String,
    },

    #[snafu(display("failed to update status of Addon {name}"))]
    ApplyAddonStatus {
        source: stackable_operator::client::Error,
        name: String,
    },

    #[snafu(display("failed to update conditions of Cluster {name}"))]
    PatchClusterStatus {
        source: stackable_operator::kube::Error,
        name: String,
    },

    #[snafu(display("failed to read the admin kubeconfig of the user cluster"))]
    AdminKubeconfig { source: kubeconfig::Error },

    #[snafu(display("failed to build a client for the user cluster"))]
    UserClusterClient { source: kubeconfig::Error },

    #[snafu(display("failed to read cloud credentials of the cluster"))]
    Credentials { source: kubeconfig::Error },

    #[snafu(display("failed to check if type {gvk} is served by the user cluster"))]
    CheckResourceType {
        source: stackable_operator::kube::Error,
        gvk: String,
    },

    #[snafu(display("failed to determine the DNS resolver IP of the user cluster"))]
    DnsResolverIp { source: network::Error },

    #[snafu(display("failed to build template data"))]
    BuildTemplateData { source: template::Error },

    #[snafu(display("failed to render addon manifests"))]
    RenderAddon { source: addon::Error },

    #[snafu(display("failed to determine the kubectl binary"))]
    KubectlBinary { source: kubectl::Error },

    #[snafu(display("failed to run kubectl"))]
    Kubectl { source: kubectl::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile_addon(
    addon: Arc<DeserializeGuard<addon_v1::Addon>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile");

    let addon = addon
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidAddonSnafu)?;
    let kube_client = ctx.client.as_kube_client();
    let cluster_name = &addon.spec.cluster.name;

    let cluster = Api::<v1::Cluster>::all(kube_client.clone())
        .get_opt(cluster_name)
        .await
        .context(GetClusterSnafu { name: cluster_name })?;
    let Some(cluster) = cluster else {
        // The manifests cannot be removed from a cluster that is gone.
        tracing::debug!(
            addon = addon.name_any(),
            cluster = cluster_name,
            "Cluster does not exist, dropping cleanup finalizer"
        );
        update_cleanup_finalizer(&ctx, addon, false).await?;
        return Ok(Action::await_change());
    };

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

    let result = reconcile_installation(addon, &cluster, &ctx).await;
    update_reconciling_condition(&ctx, &cluster, &result).await?;

    match result? {
        Some(action) => Ok(action),
        None => Ok(enforce_action(ctx.enforce_interval)),
    }
}

/// Installs or removes the addon. `Some` is an early requeue, `None` means the addon is in the
/// desired state.
async fn reconcile_installation(
    addon: &addon_v1::Addon,
    cluster: &v1::Cluster,
    ctx: &Ctx,
) -> Result<Option<Action>> {
    let addon_name = addon.name_any();
    let cluster_name = cluster.name_any();

    if !cluster.is_apiserver_healthy() {
        tracing::debug!(
            cluster = cluster_name,
            "API server is not running, trying again in {NOT_READY_REQUEUE}"
        );
        return Ok(Some(Action::requeue(*NOT_READY_REQUEUE)));
    }

    let kube_client = ctx.client.as_kube_client();
    let kubeconfig = kubeconfig::admin_kubeconfig(&kube_client, cluster)
        .await
        .context(AdminKubeconfigSnafu)?;

    if !addon.spec.required_resource_types.is_empty() {
        let user_client = kubeconfig::user_cluster_client(&kubeconfig)
            .await
            .context(UserClusterClientSnafu)?;
        for gvk in &addon.spec.required_resource_types {
            if !is_served(&user_client, gvk).await? {
                tracing::info!(
                    addon = addon_name,
                    resource = %gvk,
                    "Required resource isn't served, trying again in {NOT_READY_REQUEUE}"
                );
                return Ok(Some(Action::requeue(*NOT_READY_REQUEUE)));
            }
        }
    }

    let binary = kubectl::binary_for_cluster(cluster).context(KubectlBinarySnafu)?;
    let label_value = addon_label_value(addon);

    match install_step(addon) {
        InstallStep::Delete => {
            let rendered = render(addon, cluster, kubeconfig.clone(), ctx).await;
            match manifest_for_deletion(rendered)? {
                Some(manifest) => kubectl::run(
                    binary,
                    KubectlAction::Delete,
                    &kubeconfig,
                    &manifest,
                    label_value,
                    &cluster_name,
                )
                .await
                .context(KubectlSnafu)?,
                None => tracing::debug!(
                    addon = addon_name,
                    "Addon manifests no longer exist, nothing to delete"
                ),
            }
            update_cleanup_finalizer(ctx, addon, false).await?;
        }
        InstallStep::Keep => {}
        InstallStep::Apply => {
            let manifest = render(addon, cluster, kubeconfig.clone(), ctx).await?;
            kubectl::run(
                binary,
                KubectlAction::Apply,
                &kubeconfig,
                &manifest,
                label_value,
                &cluster_name,
            )
            .await
            .context(KubectlSnafu)?;

            update_cleanup_finalizer(ctx, addon, true).await?;
            if !addon.resources_created() {
                let mut status = addon.status.clone().unwrap_or_default();
                set_condition(
                    &mut status.conditions,
                    ConditionType::AddonResourcesCreated,
                    ConditionStatus::True,
                    "",
                    "",
                    &now_rfc3339(),
                );
                apply_addon_status(ctx, addon, &status).await?;
            }
        }
    }

    Ok(None)
}

/// Value of the `kubermatic-addon` label on the rendered objects. It is the addon directory
/// name, which may differ from the name of the Addon object.
fn addon_label_value(addon: &addon_v1::Addon) -> &str {
    &addon.spec.name
}

/// What a reconcile does with the manifests of an addon.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InstallStep {
    /// Remove the objects from the user cluster, then release the addon.
    Delete,
    /// The objects were created once and the addon is not enforced. Admins may have edited
    /// them since.
    Keep,
    Apply,
}

fn install_step(addon: &addon_v1::Addon) -> InstallStep {
    if addon.metadata.deletion_timestamp.is_some() {
        InstallStep::Delete
    } else if addon.resources_created() && !addon.ensure_requested() {
        InstallStep::Keep
    } else {
        InstallStep::Apply
    }
}

/// The manifest to delete. `None` when the addon directory is gone, there is nothing left to
/// delete with then.
fn manifest_for_deletion(rendered: Result<String>) -> Result<Option<String>> {
    match rendered {
        Ok(manifest) => Ok(Some(manifest)),
        Err(Error::RenderAddon { source }) if source.is_missing_addon() => Ok(None),
        Err(error) => Err(error),
    }
}

async fn render(
    addon: &addon_v1::Addon,
    cluster: &v1::Cluster,
    kubeconfig: String,
    ctx: &Ctx,
) -> Result<String> {
    let dns_cluster_ip = network::user_cluster_dns_resolver_ip(&cluster.network_with_defaults())
        .context(DnsResolverIpSnafu)?;
    let credentials = kubeconfig::credentials(&ctx.client.as_kube_client(), cluster)
        .await
        .context(CredentialsSnafu)?;
    let variables = template::merge_variables(
        ctx.addon_variables.get(&addon.spec.name),
        addon.spec.variables.as_ref(),
    );
    let data = TemplateData::new(
        cluster,
        credentials,
        kubeconfig,
        dns_cluster_ip,
        &ctx.node_local_dns_cache_address,
        variables,
    )
    .context(BuildTemplateDataSnafu)?;

    addon::render_addon(
        &ctx.addons_path,
        &ctx.overwrite_registry,
        addon_label_value(addon),
        &data,
    )
    .context(RenderAddonSnafu)
}

/// Whether the user cluster serves `gvk`. Only the smallest possible list is requested.
async fn is_served(
    client: &stackable_operator::kube::Client,
    gvk: &GroupVersionKind,
) -> Result<bool> {
    let kube_gvk = KubeGroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
    let (api_resource, _) = match discovery::pinned_kind(client, &kube_gvk).await {
        Ok(found) => found,
        Err(error) if is_unknown_type(&error) => return Ok(false),
        Err(error) => {
            return Err(error).context(CheckResourceTypeSnafu {
                gvk: gvk.to_string(),
            })
        }
    };

    match Api::<DynamicObject>::all_with(client.clone(), &api_resource)
        .list(&ListParams::default().limit(1))
        .await
    {
        Ok(_) => Ok(true),
        Err(error) if is_unknown_type(&error) => Ok(false),
        Err(error) => Err(error).context(CheckResourceTypeSnafu {
            gvk: gvk.to_string(),
        }),
    }
}

fn is_unknown_type(error: &stackable_operator::kube::Error) -> bool {
    match error {
        stackable_operator::kube::Error::Discovery(_) => true,
        stackable_operator::kube::Error::Api(response) => response.code == 404,
        _ => false,
    }
}

async fn update_cleanup_finalizer(ctx: &Ctx, addon: &addon_v1::Addon, present: bool) -> Result<()> {
    let Some(finalizers) = addon.finalizers_with_cleanup(present) else {
        return Ok(());
    };
    let name = addon.name_any();
    let namespace = addon.namespace().context(ObjectHasNoNamespaceSnafu)?;
    Api::<addon_v1::Addon>::namespaced(ctx.client.as_kube_client(), &namespace)
        .patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "metadata": { "finalizers": finalizers } })),
        )
        .await
        .context(PatchFinalizersSnafu { name: &name })?;
    tracing::debug!(addon = name, present, "Updated cleanup finalizer");
    Ok(())
}

async fn apply_addon_status(ctx: &Ctx, addon: &addon_v1::Addon, status: &AddonStatus) -> Result<()> {
    ctx.client
        .apply_patch_status(OPERATOR_NAME, addon, status)
        .await
        .context(ApplyAddonStatusSnafu {
            name: addon.name_any(),
        })?;
    Ok(())
}

/// Status and message of the `AddonControllerReconcilingSuccess` condition for a reconcile
/// outcome.
fn reconciling_condition<T>(result: &Result<T>) -> (ConditionStatus, String) {
    match result {
        Ok(_) => (ConditionStatus::True, String::new()),
        Err(error) => (ConditionStatus::False, error.to_string()),
    }
}

/// Only writes the cluster condition when it changes, every write triggers all addons of the
/// cluster again.
async fn update_reconciling_condition<T>(
    ctx: &Ctx,
    cluster: &v1::Cluster,
    result: &Result<T>,
) -> Result<()> {
    let (status, message) = reconciling_condition(result);
    let mut conditions = cluster.conditions().to_vec();
    let changed = update_condition(
        &mut conditions,
        ConditionType::AddonControllerReconcilingSuccess,
        status,
        "",
        &message,
        &now_rfc3339(),
    );
    if !changed {
        return Ok(());
    }

    let name = cluster.name_any();
    Api::<v1::Cluster>::all(ctx.client.as_kube_client())
        .patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": { "conditions": conditions } })),
        )
        .await
        .context(PatchClusterStatusSnafu { name })?;
    Ok(())
}

/// Remembers the `AddonControllerReconcilingSuccess` condition last seen per cluster. Only
/// clusters seen for the first time or whose condition changed re-trigger their addons, other
/// status updates of a cluster do not.
#[derive(Debug, Default)]
pub struct ClusterConditionFilter {
    seen: Mutex<BTreeMap<String, Option<Condition>>>,
}

impl ClusterConditionFilter {
    pub fn changed(&self, cluster: &v1::Cluster) -> bool {
        let condition = cluster
            .condition(ConditionType::AddonControllerReconcilingSuccess)
            .cloned();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(cluster.name_any(), condition.clone()) != Some(condition)
    }
}

fn enforce_action(enforce_interval: Option<Duration>) -> Action {
    match enforce_interval {
        Some(interval) => Action::requeue(*interval),
        None => Action::await_change(),
    }
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<addon_v1::Addon>>,
    error: &Error,
    _ctx: Arc<Ctx>,
) -> Action {
    match error {
        Error::InvalidAddon { .. } => Action::await_change(),
        _ => Action::requeue(*NOT_READY_REQUEUE),
    }
}
