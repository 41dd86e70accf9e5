use serde::{Deserialize, Serialize};
use stackable_operator::{
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
    utils::crds::raw_object_schema,
    versioned::versioned,
};

use crate::crd::{is_condition_true, Condition, ConditionType};

/// Label put on every object rendered from an addon. Used to prune objects that vanished from
/// the templates.
pub const ADDON_LABEL_KEY: &str = "kubermatic-addon";
/// Addons labeled with this key set to `true` are re-applied on every reconcile.
pub const ADDON_ENSURE_LABEL_KEY: &str = "addons.kubermatic.io/ensure";
pub const CLEANUP_FINALIZER: &str = "cleanup-manifests";

#[versioned(
    version(name = "v1"),
    crates(
        kube_core = "stackable_operator::kube::core",
        kube_client = "stackable_operator::kube::client",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars",
        versioned = "stackable_operator::versioned"
    )
)]
pub mod versioned {
    /// A bundle of manifest templates installed into a user cluster.
    #[versioned(crd(
        group = "kubermatic.k8s.io",
        plural = "addons",
        status = "AddonStatus",
        namespaced
    ))]
    #[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AddonSpec {
        /// Directory name of the addon below the addons root.
        pub name: String,

        pub cluster: ClusterReference,

        /// Free-form values made available to the templates as `Variables`. They override the
        /// operator wide variables configured for this addon.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[schemars(schema_with = "raw_object_schema")]
        pub variables: Option<serde_json::Value>,

        /// Kinds that must be served by the user cluster before the addon is applied.
        #[serde(default)]
        pub required_resource_types: Vec<GroupVersionKind>,

        #[serde(default)]
        pub is_default: bool,
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}, Kind={}", self.version, self.kind)
        } else {
            write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl v1::Addon {
    pub fn resources_created(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            is_condition_true(&status.conditions, ConditionType::AddonResourcesCreated)
        })
    }

    pub fn ensure_requested(&self) -> bool {
        self.labels()
            .get(ADDON_ENSURE_LABEL_KEY)
            .is_some_and(|value| value == "true")
    }

    pub fn has_cleanup_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == CLEANUP_FINALIZER)
    }

    /// Finalizer list with the cleanup finalizer added or removed, `None` if nothing changes.
    pub fn finalizers_with_cleanup(&self, present: bool) -> Option<Vec<String>> {
        if self.has_cleanup_finalizer() == present {
            return None;
        }
        let mut finalizers: Vec<String> = self
            .finalizers()
            .iter()
            .filter(|f| *f != CLEANUP_FINALIZER)
            .cloned()
            .collect();
        if present {
            finalizers.push(CLEANUP_FINALIZER.to_string());
        }
        Some(finalizers)
    }
}
