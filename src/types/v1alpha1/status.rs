// Copyright 2025 Qubership Monitoring Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// One status entry. `reason` identifies the entry; the list never holds two
/// conditions with the same reason.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub last_transition_time: String,
}

impl Condition {
    /// Equality on everything but the timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ConditionType {
    #[strum(to_string = "In progress")]
    InProgress,

    #[strum(to_string = "Failed")]
    Failed,

    #[strum(to_string = "Successful")]
    Successful,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ConditionStatus {
    #[strum(to_string = "True")]
    True,

    #[strum(to_string = "False")]
    False,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_serializes_type_field() {
        let condition = Condition {
            type_: ConditionType::Failed.to_string(),
            status: ConditionStatus::False.to_string(),
            reason: "ReconcileGrafanaStatus".to_owned(),
            message: "Grafana reconcile cycle failed".to_owned(),
            last_transition_time: "2026-01-01T00:00:00Z".to_owned(),
        };

        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Failed");
        assert_eq!(value["status"], "False");
        assert_eq!(value["lastTransitionTime"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_same_state_ignores_timestamp() {
        let a = Condition {
            type_: "In progress".to_owned(),
            status: "False".to_owned(),
            reason: "ReconcileCycleStatus".to_owned(),
            message: "m".to_owned(),
            last_transition_time: "2026-01-01T00:00:00Z".to_owned(),
        };
        let mut b = a.clone();
        b.last_transition_time = "2026-02-01T00:00:00Z".to_owned();
        assert!(a.same_state(&b));

        b.message = "other".to_owned();
        assert!(!a.same_state(&b));
    }
}
