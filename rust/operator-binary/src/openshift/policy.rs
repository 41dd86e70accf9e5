//! The bootstrap RBAC policy of an OpenShift user cluster.

use std::{collections::BTreeSet, fmt::Debug};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::{
            core::v1::Namespace,
            rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
        },
        NamespaceResourceScope,
    },
    kube::{
        api::{Patch, PatchParams},
        core::ObjectMeta,
        Api, Client, Resource, ResourceExt,
    },
};

const POLICY_JSON: &str = include_str!("policy.json");

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to parse policy list"))]
    ParseList { source: serde_json::Error },

    #[snafu(display("failed to parse policy object {index}"))]
    ParseObject {
        source: serde_json::Error,
        index: usize,
    },

    #[snafu(display("policy object {index} has unsupported kind {kind:?}"))]
    UnsupportedKind { index: usize, kind: String },

    #[snafu(display("failed to apply {kind} {name:?} to the user cluster"))]
    Apply {
        source: stackable_operator::kube::Error,
        kind: String,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Deserialize)]
struct List {
    items: Vec<serde_json::Value>,
}

/// One object of the policy list.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyObject {
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
}

impl PolicyObject {
    pub fn namespace(&self) -> Option<String> {
        match self {
            PolicyObject::ClusterRole(_) | PolicyObject::ClusterRoleBinding(_) => None,
            PolicyObject::Role(role) => role.namespace(),
            PolicyObject::RoleBinding(binding) => binding.namespace(),
        }
    }
}

fn parse_object<K: DeserializeOwned>(value: serde_json::Value, index: usize) -> Result<K> {
    serde_json::from_value(value).context(ParseObjectSnafu { index })
}

/// Parses the embedded policy list into typed RBAC objects.
pub fn policy() -> Result<Vec<PolicyObject>> {
    let list: List = serde_json::from_str(POLICY_JSON).context(ParseListSnafu)?;
    list.items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let kind = item
                .get("kind")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            match kind.as_str() {
                "ClusterRole" => parse_object(item, index).map(PolicyObject::ClusterRole),
                "ClusterRoleBinding" => {
                    parse_object(item, index).map(PolicyObject::ClusterRoleBinding)
                }
                "Role" => parse_object(item, index).map(PolicyObject::Role),
                "RoleBinding" => parse_object(item, index).map(PolicyObject::RoleBinding),
                _ => UnsupportedKindSnafu { index, kind }.fail(),
            }
        })
        .collect()
}

async fn apply_cluster_scoped<K>(client: &Client, field_manager: &str, object: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = object.name_any();
    Api::<K>::all(client.clone())
        .patch(
            &name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(object),
        )
        .await
        .with_context(|_| ApplySnafu {
            kind: K::kind(&()).to_string(),
            name: &name,
        })?;
    Ok(())
}

async fn apply_namespaced<K>(client: &Client, field_manager: &str, object: &K) -> Result<()>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let name = object.name_any();
    let namespace = object.namespace().unwrap_or_else(|| "default".to_string());
    Api::<K>::namespaced(client.clone(), &namespace)
        .patch(
            &name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(object),
        )
        .await
        .with_context(|_| ApplySnafu {
            kind: K::kind(&()).to_string(),
            name: format!("{namespace}/{name}"),
        })?;
    Ok(())
}

/// Applies the policy to the user cluster. Namespaces referenced by namespaced objects are
/// created first, the user cluster does not ship all of them.
pub async fn apply_policy(client: &Client, field_manager: &str) -> Result<()> {
    let objects = policy()?;

    let namespaces: BTreeSet<String> = objects
        .iter()
        .filter_map(PolicyObject::namespace)
        .collect();
    for name in namespaces {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        apply_cluster_scoped(client, field_manager, &namespace).await?;
    }

    for object in &objects {
        match object {
            PolicyObject::ClusterRole(o) => apply_cluster_scoped(client, field_manager, o).await?,
            PolicyObject::ClusterRoleBinding(o) => {
                apply_cluster_scoped(client, field_manager, o).await?
            }
            PolicyObject::Role(o) => apply_namespaced(client, field_manager, o).await?,
            PolicyObject::RoleBinding(o) => apply_namespaced(client, field_manager, o).await?,
        }
    }
    tracing::debug!(objects = objects.len(), "Applied user cluster RBAC policy");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_object_parses() {
        let objects = policy().unwrap();
        assert_eq!(objects.len(), 169);

        let count = |f: fn(&PolicyObject) -> bool| objects.iter().filter(|o| f(o)).count();
        assert_eq!(count(|o| matches!(o, PolicyObject::ClusterRole(_))), 103);
        assert_eq!(count(|o| matches!(o, PolicyObject::ClusterRoleBinding(_))), 49);
        assert_eq!(count(|o| matches!(o, PolicyObject::Role(_))), 9);
        assert_eq!(count(|o| matches!(o, PolicyObject::RoleBinding(_))), 8);
    }

    #[test]
    fn test_sudoer_role() {
        let objects = policy().unwrap();
        let Some(PolicyObject::ClusterRole(sudoer)) = objects.first() else {
            panic!("first policy object is not a ClusterRole");
        };
        assert_eq!(sudoer.name_any(), "sudoer");
        let rules = sudoer.rules.as_ref().unwrap();
        assert_eq!(rules[0].verbs, vec!["impersonate"]);
        assert_eq!(
            rules[0].resource_names.as_deref(),
            Some(&["system:admin".to_string()][..])
        );
    }

    #[test]
    fn test_namespaced_objects_carry_namespace() {
        let namespaces: BTreeSet<String> = policy()
            .unwrap()
            .iter()
            .filter_map(PolicyObject::namespace)
            .collect();
        assert_eq!(
            namespaces,
            BTreeSet::from(
                ["kube-public", "kube-system", "openshift", "openshift-node"].map(String::from)
            )
        );
    }
}
