//! Status conditions
//!
//! Kubernetes-style conditions shared by `NodePool` and `Node`. Only one
//! condition type is used today (`Provisioned`), but the helpers work on
//! any type string so the list can grow without schema changes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type carried by both NodePool and Node
pub const PROVISIONED: &str = "Provisioned";

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,

    /// Condition does not hold (yet)
    False,

    /// State could not be determined
    #[default]
    Unknown,
}

/// Reasons used with the `Provisioned` condition
///
/// Serialized as PascalCase in the condition's `reason` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionReason {
    /// Allocation is under way
    InProgress,
    /// Every requested node is allocated and provisioned
    Completed,
    /// The request cannot be satisfied
    Failed,
}

impl ProvisionReason {
    /// Wire value for the `reason` field
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionReason::InProgress => "InProgress",
            ProvisionReason::Completed => "Completed",
            ProvisionReason::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ProvisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Provisioned")
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason (PascalCase)
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// `metadata.generation` the condition was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Whether this condition carries the given reason
    pub fn has_reason(&self, reason: ProvisionReason) -> bool {
        self.reason == reason.as_str()
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Insert or update a condition by type.
///
/// `lastTransitionTime` only moves when `status` changes, so re-applying the
/// same condition on every pass does not churn the object.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: ProvisionReason,
    message: impl Into<String>,
    observed_generation: Option<i64>,
) {
    let message = message.into();
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(Utc::now());
            }
            existing.reason = reason.as_str().to_string();
            existing.message = message;
            existing.observed_generation = observed_generation;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status,
            reason: reason.as_str().to_string(),
            message,
            observed_generation,
            last_transition_time: Some(Utc::now()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_inserts_when_missing() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            PROVISIONED,
            ConditionStatus::False,
            ProvisionReason::InProgress,
            "Handling creation",
            Some(1),
        );

        assert_eq!(conditions.len(), 1);
        let c = &conditions[0];
        assert_eq!(c.type_, PROVISIONED);
        assert_eq!(c.reason, "InProgress");
        assert_eq!(c.observed_generation, Some(1));
        assert!(c.last_transition_time.is_some());
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, PROVISIONED, ConditionStatus::False, ProvisionReason::InProgress, "a", None);
        let first = conditions[0].last_transition_time;

        set_condition(&mut conditions, PROVISIONED, ConditionStatus::False, ProvisionReason::InProgress, "b", None);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].message, "b");
    }

    #[test]
    fn test_set_condition_flips_status() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, PROVISIONED, ConditionStatus::False, ProvisionReason::InProgress, "", None);
        set_condition(&mut conditions, PROVISIONED, ConditionStatus::True, ProvisionReason::Completed, "Created", None);

        let c = find_condition(&conditions, PROVISIONED).unwrap();
        assert_eq!(c.status, ConditionStatus::True);
        assert!(c.has_reason(ProvisionReason::Completed));
    }

    #[test]
    fn test_condition_wire_format() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, PROVISIONED, ConditionStatus::True, ProvisionReason::Completed, "Provisioned", None);

        let json = serde_json::to_value(&conditions[0]).unwrap();
        assert_eq!(json["type"], "Provisioned");
        assert_eq!(json["status"], "True");
        assert_eq!(json["reason"], "Completed");
        assert!(json.get("observedGeneration").is_none());
    }
}
