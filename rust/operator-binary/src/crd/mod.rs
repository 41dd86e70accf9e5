pub mod addon;
pub mod cloud;
pub mod cluster;

use serde::{Deserialize, Serialize};
use stackable_operator::schemars::{self, JsonSchema};
use strum::{Display, EnumString};

pub const OPERATOR_NAME: &str = "kubermatic.k8s.io";

/// Clusters carrying this label are only handled by the controller started with the same
/// `--worker-name`.
pub const WORKER_NAME_LABEL_KEY: &str = "worker-name";

/// Well known condition types written by the controllers in this crate.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
pub enum ConditionType {
    AddonControllerReconcilingSuccess,
    OpenshiftControllerReconcilingSuccess,
    ClusterInitialized,
    AddonResourcesCreated,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    let type_ = type_.to_string();
    conditions.iter().find(|condition| condition.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find_condition(conditions, type_)
        .is_some_and(|condition| condition.status == ConditionStatus::True)
}

/// Upserts a condition. The transition time only moves when the status changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: &str,
) {
    let type_name = type_.to_string();
    match conditions.iter_mut().find(|c| c.type_ == type_name) {
        Some(condition) => {
            if condition.status != status {
                condition.last_transition_time = Some(now.to_string());
            }
            condition.status = status;
            condition.last_heartbeat_time = Some(now.to_string());
            condition.reason = reason.to_string();
            condition.message = message.to_string();
        }
        None => conditions.push(Condition {
            type_: type_name,
            status,
            last_heartbeat_time: Some(now.to_string()),
            last_transition_time: Some(now.to_string()),
            reason: reason.to_string(),
            message: message.to_string(),
        }),
    }
}

/// Like [`set_condition`], but leaves the conditions untouched when status, reason and message
/// already match. Returns whether anything changed.
pub fn update_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: &str,
) -> bool {
    let unchanged = find_condition(conditions, type_).is_some_and(|condition| {
        condition.status == status && condition.reason == reason && condition.message == message
    });
    if unchanged {
        return false;
    }
    set_condition(conditions, type_, status, reason, message, now);
    true
}

/// Current time in the RFC 3339 form used by condition timestamps.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_on_same_status() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::AddonResourcesCreated,
            ConditionStatus::True,
            "",
            "",
            "2024-01-01T00:00:00Z",
        );
        set_condition(
            &mut conditions,
            ConditionType::AddonResourcesCreated,
            ConditionStatus::True,
            "",
            "",
            "2024-01-02T00:00:00Z",
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            conditions[0].last_heartbeat_time.as_deref(),
            Some("2024-01-02T00:00:00Z")
        );
        assert!(is_condition_true(
            &conditions,
            ConditionType::AddonResourcesCreated
        ));
    }

    #[test]
    fn test_set_condition_moves_transition_time_on_change() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::ClusterInitialized,
            ConditionStatus::False,
            "NotReady",
            "apiserver down",
            "2024-01-01T00:00:00Z",
        );
        set_condition(
            &mut conditions,
            ConditionType::ClusterInitialized,
            ConditionStatus::True,
            "",
            "",
            "2024-01-02T00:00:00Z",
        );

        let condition = find_condition(&conditions, ConditionType::ClusterInitialized).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(
            condition.last_transition_time.as_deref(),
            Some("2024-01-02T00:00:00Z")
        );
        assert!(condition.reason.is_empty());
    }

    #[test]
    fn test_update_condition_skips_identical() {
        let mut conditions = Vec::new();
        assert!(update_condition(
            &mut conditions,
            ConditionType::OpenshiftControllerReconcilingSuccess,
            ConditionStatus::True,
            "",
            "",
            "2024-01-01T00:00:00Z",
        ));
        assert!(!update_condition(
            &mut conditions,
            ConditionType::OpenshiftControllerReconcilingSuccess,
            ConditionStatus::True,
            "",
            "",
            "2024-01-02T00:00:00Z",
        ));
        assert_eq!(
            conditions[0].last_heartbeat_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );

        assert!(update_condition(
            &mut conditions,
            ConditionType::OpenshiftControllerReconcilingSuccess,
            ConditionStatus::False,
            "",
            "boom",
            "2024-01-03T00:00:00Z",
        ));
        assert_eq!(conditions[0].message, "boom");
    }
}
