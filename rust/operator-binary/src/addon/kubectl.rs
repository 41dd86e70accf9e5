//! Applying and deleting rendered addon manifests with the kubectl binary matching the user
//! cluster version.

use std::{io::Write, path::Path};

use snafu::{ResultExt, Snafu};
use strum::Display;
use tempfile::NamedTempFile;

use crate::crd::{addon::ADDON_LABEL_KEY, cluster::v1};

/// kubectl used for OpenShift clusters, whose version is not a Kubernetes version.
const DEFAULT_KUBECTL: &str = "kubectl";

/// Binaries shipped with the image, each covering one minor version of skew in both directions.
const KUBECTL_BINARIES: &[(u64, &str)] = &[
    (22, "kubectl-1.22"),
    (25, "kubectl-1.25"),
    (28, "kubectl-1.28"),
];

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to determine cluster version"))]
    ClusterVersion {
        source: crate::crd::cluster::Error,
    },

    #[snafu(display("no kubectl available for cluster version {version}"))]
    UnsupportedVersion { version: semver::Version },

    #[snafu(display("failed to write {what} for addon {addon} of cluster {cluster}"))]
    WriteTempFile {
        source: std::io::Error,
        what: &'static str,
        addon: String,
        cluster: String,
    },

    #[snafu(display("failed to spawn '{command}' for addon {addon} of cluster {cluster}"))]
    Spawn {
        source: std::io::Error,
        command: String,
        addon: String,
        cluster: String,
    },

    #[snafu(display(
        "failed to execute '{command}' for addon {addon} of cluster {cluster}: {status}\n{output}"
    ))]
    CommandFailed {
        command: String,
        addon: String,
        cluster: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum KubectlAction {
    Apply,
    Delete,
}

/// Picks the kubectl binary for the cluster.
pub fn binary_for_cluster(cluster: &v1::Cluster) -> Result<&'static str> {
    if cluster.is_openshift() {
        return Ok(DEFAULT_KUBECTL);
    }
    let version = cluster.version().context(ClusterVersionSnafu)?;
    KUBECTL_BINARIES
        .iter()
        .find(|(minor, _)| version.major == 1 && version.minor.abs_diff(*minor) <= 1)
        .map(|(_, binary)| *binary)
        .ok_or_else(|| UnsupportedVersionSnafu { version }.build())
}

/// kubectl arguments. Apply prunes every object carrying the addon label that is no longer part
/// of the manifest.
pub fn kubectl_args(
    action: KubectlAction,
    kubeconfig: &Path,
    manifest: &Path,
    addon_name: &str,
) -> Vec<String> {
    let mut args = vec![
        "--kubeconfig".to_string(),
        kubeconfig.display().to_string(),
        action.to_string(),
    ];
    match action {
        KubectlAction::Apply => args.extend([
            "--prune".to_string(),
            "--filename".to_string(),
            manifest.display().to_string(),
            "--selector".to_string(),
            format!("{ADDON_LABEL_KEY}={addon_name}"),
        ]),
        KubectlAction::Delete => args.extend([
            "--filename".to_string(),
            manifest.display().to_string(),
            "--ignore-not-found".to_string(),
        ]),
    }
    args
}

fn temp_file(
    prefix: String,
    suffix: &str,
    content: &str,
    what: &'static str,
    addon: &str,
    cluster: &str,
) -> Result<NamedTempFile> {
    let context = || WriteTempFileSnafu {
        what,
        addon,
        cluster,
    };
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(suffix)
        .tempfile()
        .with_context(|_| context())?;
    file.write_all(content.as_bytes())
        .with_context(|_| context())?;
    file.flush().with_context(|_| context())?;
    Ok(file)
}

/// Runs kubectl against the user cluster. The manifest and kubeconfig only live on disk for the
/// duration of the call. An empty manifest is a no-op.
pub async fn run(
    binary: &str,
    action: KubectlAction,
    kubeconfig: &str,
    manifest: &str,
    addon_name: &str,
    cluster_name: &str,
) -> Result<()> {
    if manifest.trim().is_empty() {
        tracing::debug!(
            addon = addon_name,
            cluster = cluster_name,
            "Manifest is empty, skipping kubectl {action}"
        );
        return Ok(());
    }

    let manifest_file = temp_file(
        format!("cluster-{cluster_name}-{addon_name}-"),
        ".yaml",
        manifest,
        "combined manifest",
        addon_name,
        cluster_name,
    )?;
    let kubeconfig_file = temp_file(
        format!("cluster-{cluster_name}-addon-{addon_name}-kubeconfig-"),
        "",
        kubeconfig,
        "kubeconfig",
        addon_name,
        cluster_name,
    )?;

    let args = kubectl_args(
        action,
        kubeconfig_file.path(),
        manifest_file.path(),
        addon_name,
    );
    let command = format!("{binary} {}", args.join(" "));
    tracing::debug!(addon = addon_name, cluster = cluster_name, command = %command, "Running kubectl");

    let output = tokio::process::Command::new(binary)
        .args(&args)
        .output()
        .await
        .with_context(|_| SpawnSnafu {
            command: &command,
            addon: addon_name,
            cluster: cluster_name,
        })?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return CommandFailedSnafu {
            command,
            addon: addon_name,
            cluster: cluster_name,
            status: output.status,
            output: combined,
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn cluster(version: &str, openshift: bool) -> v1::Cluster {
        let openshift = if openshift { "openshift: {}" } else { "" };
        serde_yaml::from_str(&format!(
            r#"
            apiVersion: kubermatic.k8s.io/v1
            kind: Cluster
            metadata:
              name: xyz42
            spec:
              version: {version}
              cloud:
                aws: {{}}
              {openshift}
            "#
        ))
        .expect("illegal test input")
    }

    #[rstest]
    #[case("1.21.3", "kubectl-1.22")]
    #[case("v1.23.0", "kubectl-1.22")]
    #[case("1.24.1", "kubectl-1.25")]
    #[case("1.26.9", "kubectl-1.25")]
    #[case("1.29.0", "kubectl-1.28")]
    fn test_binary_for_version(#[case] version: &str, #[case] expected: &str) {
        assert_eq!(binary_for_cluster(&cluster(version, false)).unwrap(), expected);
    }

    #[rstest]
    #[case("1.18.0")]
    #[case("1.30.0")]
    #[case("2.0.0")]
    fn test_unsupported_version(#[case] version: &str) {
        assert!(matches!(
            binary_for_cluster(&cluster(version, false)),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_openshift_uses_default_binary() {
        assert_eq!(
            binary_for_cluster(&cluster("4.1.18", true)).unwrap(),
            "kubectl"
        );
    }

    #[test]
    fn test_apply_args() {
        let args = kubectl_args(
            KubectlAction::Apply,
            Path::new("/tmp/kc"),
            Path::new("/tmp/m.yaml"),
            "canal",
        );
        assert_eq!(
            args,
            vec![
                "--kubeconfig",
                "/tmp/kc",
                "apply",
                "--prune",
                "--filename",
                "/tmp/m.yaml",
                "--selector",
                "kubermatic-addon=canal"
            ]
        );
    }

    #[test]
    fn test_delete_args() {
        let args = kubectl_args(
            KubectlAction::Delete,
            Path::new("/tmp/kc"),
            Path::new("/tmp/m.yaml"),
            "canal",
        );
        assert_eq!(
            args,
            vec![
                "--kubeconfig",
                "/tmp/kc",
                "delete",
                "--filename",
                "/tmp/m.yaml",
                "--ignore-not-found"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_manifest_is_skipped() {
        run("does-not-exist", KubectlAction::Apply, "", "  \n", "canal", "xyz42")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failure_reports_command_and_output() {
        let error = run(
            "false",
            KubectlAction::Apply,
            "kubeconfig",
            "apiVersion: v1\nkind: ConfigMap\n",
            "canal",
            "xyz42",
        )
        .await
        .unwrap_err();
        let message = error.to_string();
        assert!(message.starts_with("failed to execute 'false --kubeconfig "));
        assert!(message.contains("for addon canal of cluster xyz42"));
    }
}
