//! Shared status types used across forge resources

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Parse the string form used by foreign resources ("True", "False", anything else)
    pub fn from_wire(value: &str) -> Self {
        match value {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, SourceResolved)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition's status changed
    pub last_transition_time: DateTime<Utc>,

    /// Generation the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Attach the generation this condition describes
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}

/// Insert or replace the condition of the same type.
///
/// The transition time of an existing entry is kept when its status does
/// not change, so repeated identical writes compare equal.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_set_condition_appends_new_types() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "Succeeded", ""),
        );
        set_condition(
            &mut conditions,
            Condition::new("SourceResolved", ConditionStatus::True, "Resolved", ""),
        );
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, "SourceResolved").is_some());
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let earlier = Utc::now() - Duration::minutes(10);
        let mut conditions = vec![Condition {
            last_transition_time: earlier,
            ..Condition::new("Ready", ConditionStatus::False, "Running", "")
        }];

        set_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::False, "Failed", "step build failed"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "Failed");
        assert_eq!(conditions[0].last_transition_time, earlier);

        set_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "Succeeded", ""),
        );
        assert!(conditions[0].last_transition_time > earlier);
    }

    #[test]
    fn test_condition_wire_format() {
        let condition = Condition::new("Ready", ConditionStatus::True, "Succeeded", "done")
            .with_generation(3);
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert_eq!(json["observedGeneration"], 3);
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn test_condition_status_from_wire() {
        assert_eq!(ConditionStatus::from_wire("True"), ConditionStatus::True);
        assert_eq!(ConditionStatus::from_wire("False"), ConditionStatus::False);
        assert_eq!(ConditionStatus::from_wire("Unknown"), ConditionStatus::Unknown);
        assert_eq!(ConditionStatus::from_wire(""), ConditionStatus::Unknown);
    }
}
