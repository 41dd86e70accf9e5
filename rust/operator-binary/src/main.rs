use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use stackable_operator::{
    cli::ProductOperatorRun,
    client::{self, Client},
    k8s_openapi::api::{
        apps::v1::{Deployment, StatefulSet},
        core::v1::{ConfigMap, Namespace, Secret, Service},
    },
    kube::{
        core::DeserializeGuard,
        runtime::{reflector::ObjectRef, watcher, Controller},
        Api, CustomResourceExt, ResourceExt,
    },
    logging::controller::report_controller_reconciled,
    namespace::WatchNamespace,
    shared::time::Duration,
    telemetry::Tracing,
};

use crate::{
    addon_controller::ADDON_FULL_CONTROLLER_NAME,
    crd::{addon::v1::Addon, cluster::v1::Cluster, OPERATOR_NAME},
    openshift_controller::OPENSHIFT_FULL_CONTROLLER_NAME,
    render::{RenderArgs, DEFAULT_NODE_LOCAL_DNS_CACHE_ADDRESS},
};

mod addon;
mod addon_controller;
mod crd;
mod kubeconfig;
mod openshift;
mod openshift_controller;
mod render;
mod resource;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(clap::Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Print the CustomResourceDefinitions of Cluster and Addon
    Crd,
    /// Run the addon and OpenShift controllers
    Run(SeedRun),
    /// Render an addon against a Cluster manifest and print the result
    Render(RenderArgs),
}

#[derive(clap::Parser)]
struct SeedRun {
    /// Root directory with one sub-directory per addon.
    #[clap(long, env)]
    addons_path: PathBuf,

    /// Registry replacing the default registry of every image.
    #[clap(long, env, default_value = "")]
    overwrite_registry: String,

    /// YAML file mapping addon names to their default variables.
    #[clap(long, env)]
    addon_variables: Option<PathBuf>,

    /// Minutes between re-applying installed addons. 0 disables re-applying.
    #[clap(long, env, default_value_t = 5)]
    addon_enforce_interval: u64,

    #[clap(long, env, default_value = "quay.io/kubermatic/kubermatic")]
    kubermatic_image: String,

    #[clap(long, env, default_value = built_info::PKG_VERSION)]
    kubermatic_image_tag: String,

    #[clap(long, env, default_value = DEFAULT_NODE_LOCAL_DNS_CACHE_ADDRESS)]
    node_local_dns_cache_address: String,

    /// File with the docker config JSON of the `dockercfg` pull secret.
    #[clap(long, env)]
    openshift_pull_secret: Option<PathBuf>,

    /// Only clusters labeled `worker-name=<value>` are reconciled. Empty selects clusters
    /// without that label.
    #[clap(long, env, default_value = "")]
    worker_name: String,

    #[clap(flatten)]
    common: ProductOperatorRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            for crd in [Cluster::crd(), Addon::crd()] {
                print!("---\n{}", serde_yaml::to_string(&crd)?);
            }
        }
        Command::Render(args) => {
            let manifest = render::render(&args).context("failed to render addon")?;
            print!("{manifest}");
        }
        Command::Run(SeedRun {
            addons_path,
            overwrite_registry,
            addon_variables,
            addon_enforce_interval,
            kubermatic_image,
            kubermatic_image_tag,
            node_local_dns_cache_address,
            openshift_pull_secret,
            worker_name,
            common:
                ProductOperatorRun {
                    watch_namespace,
                    telemetry_arguments,
                    cluster_info_opts,
                    ..
                },
        }) => {
            let _tracing_guard =
                Tracing::pre_configured(built_info::PKG_NAME, telemetry_arguments).init()?;

            tracing::info!(
                built_info.pkg_version = built_info::PKG_VERSION,
                built_info.git_version = built_info::GIT_VERSION,
                built_info.target = built_info::TARGET,
                built_info.built_time_utc = built_info::BUILT_TIME_UTC,
                built_info.rustc_version = built_info::RUSTC_VERSION,
                "Starting {description}",
                description = built_info::PKG_DESCRIPTION
            );

            let addon_variables = match addon_variables {
                Some(path) => render::read_addon_variables(&path)
                    .context("failed to load addon variables")?,
                None => BTreeMap::new(),
            };
            let docker_pull_config = openshift_pull_secret
                .map(std::fs::read_to_string)
                .transpose()
                .context("failed to read the OpenShift pull secret")?;

            let client =
                client::initialize_operator(Some(OPERATOR_NAME.to_string()), &cluster_info_opts)
                    .await?;

            let addon_ctx = addon_controller::Ctx {
                client: client.clone(),
                addons_path,
                overwrite_registry: overwrite_registry.clone(),
                addon_variables,
                enforce_interval: (addon_enforce_interval > 0)
                    .then(|| Duration::from_secs(addon_enforce_interval * 60)),
                node_local_dns_cache_address,
                worker_name: worker_name.clone(),
            };
            let openshift_ctx = openshift_controller::Ctx {
                client: client.clone(),
                overwrite_registry,
                prober_image: format!("{kubermatic_image}:{kubermatic_image_tag}"),
                docker_pull_config,
                worker_name,
            };
            create_controllers(client, watch_namespace, addon_ctx, openshift_ctx).await;
        }
    };

    Ok(())
}

async fn create_controllers(
    client: Client,
    namespace: WatchNamespace,
    addon_ctx: addon_controller::Ctx,
    openshift_ctx: openshift_controller::Ctx,
) {
    let cluster_api = Api::<DeserializeGuard<Cluster>>::all(client.as_kube_client());

    let addon_controller = Controller::new(
        namespace.get_api::<DeserializeGuard<Addon>>(&client),
        watcher::Config::default(),
    );
    let addon_store = addon_controller.store();
    let condition_filter = addon_controller::ClusterConditionFilter::default();
    let addon_controller = addon_controller
        .watches(
            cluster_api.clone(),
            watcher::Config::default(),
            move |cluster| {
                let cluster_name = cluster.name_any();
                let triggers = cluster
                    .0
                    .as_ref()
                    .map_or(true, |cluster| condition_filter.changed(cluster));
                addon_store
                    .state()
                    .into_iter()
                    .filter(move |addon| {
                        triggers
                            && addon
                                .0
                                .as_ref()
                                .is_ok_and(|addon| addon.spec.cluster.name == cluster_name)
                    })
                    .map(|addon| ObjectRef::from_obj(&*addon))
            },
        )
        .shutdown_on_signal()
        .run(
            addon_controller::reconcile_addon,
            addon_controller::error_policy,
            Arc::new(addon_ctx),
        )
        .map(|res| {
            report_controller_reconciled(&client, ADDON_FULL_CONTROLLER_NAME, &res);
        });

    let openshift_controller = Controller::new(cluster_api, watcher::Config::default())
        .owns(
            namespace.get_api::<Deployment>(&client),
            watcher::Config::default(),
        )
        .owns(
            namespace.get_api::<StatefulSet>(&client),
            watcher::Config::default(),
        )
        .owns(
            namespace.get_api::<Service>(&client),
            watcher::Config::default(),
        )
        .owns(
            namespace.get_api::<ConfigMap>(&client),
            watcher::Config::default(),
        )
        .owns(
            namespace.get_api::<Secret>(&client),
            watcher::Config::default(),
        )
        .owns(
            Api::<Namespace>::all(client.as_kube_client()),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(
            openshift_controller::reconcile_cluster,
            openshift_controller::error_policy,
            Arc::new(openshift_ctx),
        )
        .map(|res| {
            report_controller_reconciled(&client, OPENSHIFT_FULL_CONTROLLER_NAME, &res);
        });

    futures::stream::select(addon_controller, openshift_controller)
        .collect::<()>()
        .await;
}
