//! Offline addon rendering: a Cluster manifest plus an addon directory in, the manifest kubectl
//! would receive out. No Kubernetes API is involved.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    addon::{
        self,
        template::{merge_variables, TemplateData},
    },
    crd::cluster::v1,
    resource::network,
};

pub const DEFAULT_NODE_LOCAL_DNS_CACHE_ADDRESS: &str = "169.254.20.10";

#[derive(clap::Parser)]
pub struct RenderArgs {
    /// YAML file containing the Cluster object to render against.
    #[clap(long)]
    pub cluster: PathBuf,

    /// Directory of the addon to render.
    #[clap(long)]
    pub addon: PathBuf,

    /// Registry replacing the default registry of every image.
    #[clap(long, env, default_value = "")]
    pub overwrite_registry: String,

    /// YAML file with the addon variables.
    #[clap(long)]
    pub variables: Option<PathBuf>,

    #[clap(long, default_value = DEFAULT_NODE_LOCAL_DNS_CACHE_ADDRESS)]
    pub node_local_dns_cache_address: String,
}

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read {}", path.display()))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse Cluster from {}", path.display()))]
    ParseCluster {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse variables from {}", path.display()))]
    ParseVariables {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("addon path {} does not name a directory", path.display()))]
    InvalidAddonPath { path: PathBuf },

    #[snafu(display("failed to determine the DNS resolver IP of the cluster"))]
    DnsResolverIp { source: network::Error },

    #[snafu(display("failed to build template data"))]
    BuildTemplateData {
        source: addon::template::Error,
    },

    #[snafu(display("failed to render addon"))]
    RenderAddon { source: addon::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).context(ReadFileSnafu { path })
}

/// Reads a YAML file mapping addon names to their variables.
pub fn read_addon_variables(path: &Path) -> Result<BTreeMap<String, serde_json::Value>> {
    serde_yaml::from_str(&read_file(path)?).context(ParseVariablesSnafu { path })
}

/// Renders the addon and returns the combined, labeled manifest.
pub fn render(args: &RenderArgs) -> Result<String> {
    let cluster: v1::Cluster = serde_yaml::from_str(&read_file(&args.cluster)?)
        .context(ParseClusterSnafu { path: &args.cluster })?;
    let variables: Option<serde_json::Value> = match &args.variables {
        Some(path) => {
            Some(serde_yaml::from_str(&read_file(path)?).context(ParseVariablesSnafu { path })?)
        }
        None => None,
    };

    let addons_path = args
        .addon
        .parent()
        .context(InvalidAddonPathSnafu { path: &args.addon })?;
    let addon_name = args
        .addon
        .file_name()
        .and_then(|name| name.to_str())
        .context(InvalidAddonPathSnafu { path: &args.addon })?;

    let dns_cluster_ip = network::user_cluster_dns_resolver_ip(&cluster.network_with_defaults())
        .context(DnsResolverIpSnafu)?;
    let data = TemplateData::new(
        &cluster,
        BTreeMap::new(),
        String::new(),
        dns_cluster_ip,
        &args.node_local_dns_cache_address,
        merge_variables(None, variables.as_ref()),
    )
    .context(BuildTemplateDataSnafu)?;

    tracing::debug!(addon = addon_name, "Rendering addon");
    addon::render_addon(addons_path, &args.overwrite_registry, addon_name, &data)
        .context(RenderAddonSnafu)
}
