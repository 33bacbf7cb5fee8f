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

use crate::types::v1alpha1::status::{Condition, ConditionStatus, ConditionType, Status};
use chrono::{SecondsFormat, Utc};

/// Reason-keyed list of status conditions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionStore {
    conditions: Vec<Condition>,
}

impl ConditionStore {
    pub fn from_status(status: Option<&Status>) -> Self {
        Self {
            conditions: status.map(|s| s.conditions.clone()).unwrap_or_default(),
        }
    }

    /// Returns true when the list changed.
    pub fn set(
        &mut self,
        reason: &str,
        type_: ConditionType,
        status: ConditionStatus,
        message: &str,
    ) -> bool {
        if reason.is_empty() {
            return false;
        }

        let mut condition = Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_owned(),
            message: message.to_owned(),
            last_transition_time: String::new(),
        };

        match self.conditions.iter_mut().find(|c| c.reason == reason) {
            Some(existing) if existing.same_state(&condition) => false,
            Some(existing) => {
                condition.last_transition_time = now();
                *existing = condition;
                true
            }
            None => {
                condition.last_transition_time = now();
                self.conditions.push(condition);
                true
            }
        }
    }

    /// Order is not preserved: the last entry takes the removed slot.
    pub fn remove(&mut self, reason: &str) -> bool {
        match self.conditions.iter().position(|c| c.reason == reason) {
            Some(index) => {
                self.conditions.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has_any_failure(&self) -> bool {
        let failed = ConditionType::Failed.to_string();
        self.conditions.iter().any(|c| c.type_ == failed)
    }

    pub fn get(&self, reason: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.reason == reason)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn to_status(&self) -> Status {
        Status {
            conditions: self.conditions.clone(),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const CYCLE: &str = "ReconcileCycleStatus";

    #[test]
    fn test_set_appends_then_is_idempotent() {
        let mut store = ConditionStore::default();
        assert!(store.set(CYCLE, ConditionType::InProgress, ConditionStatus::False, "m"));
        assert!(!store.set(CYCLE, ConditionType::InProgress, ConditionStatus::False, "m"));
        assert_eq!(store.conditions().len(), 1);

        let stored = store.get(CYCLE).unwrap();
        assert_eq!(stored.type_, "In progress");
        assert!(chrono::DateTime::parse_from_rfc3339(&stored.last_transition_time).is_ok());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut store = ConditionStore::default();
        store.set("A", ConditionType::Failed, ConditionStatus::False, "a");
        store.set(CYCLE, ConditionType::InProgress, ConditionStatus::False, "m");
        assert!(store.set(CYCLE, ConditionType::Successful, ConditionStatus::True, "done"));

        assert_eq!(store.conditions().len(), 2);
        assert_eq!(store.conditions()[1].type_, "Successful");
        assert_eq!(store.conditions()[1].status, "True");
        assert_eq!(store.conditions()[1].message, "done");
    }

    #[test]
    fn test_empty_reason_is_ignored() {
        let mut store = ConditionStore::default();
        assert!(!store.set("", ConditionType::Failed, ConditionStatus::False, "x"));
        assert!(store.conditions().is_empty());
        assert!(!store.has_any_failure());
    }

    #[test]
    fn test_remove_swaps_last_into_place() {
        let mut store = ConditionStore::default();
        store.set("A", ConditionType::Failed, ConditionStatus::False, "a");
        store.set("B", ConditionType::Failed, ConditionStatus::False, "b");
        store.set("C", ConditionType::Failed, ConditionStatus::False, "c");

        assert!(store.remove("A"));
        let reasons: Vec<_> = store.conditions().iter().map(|c| c.reason.as_str()).collect();
        assert_eq!(reasons, ["C", "B"]);

        assert!(!store.remove("A"));
    }

    #[test]
    fn test_has_any_failure() {
        let mut store = ConditionStore::default();
        store.set(CYCLE, ConditionType::InProgress, ConditionStatus::False, "m");
        assert!(!store.has_any_failure());

        store.set("ReconcileGrafanaStatus", ConditionType::Failed, ConditionStatus::False, "f");
        assert!(store.has_any_failure());

        store.remove("ReconcileGrafanaStatus");
        assert!(!store.has_any_failure());
    }

    #[test]
    fn test_from_status_keeps_existing_entries() {
        let mut store = ConditionStore::default();
        store.set("A", ConditionType::Failed, ConditionStatus::False, "a");
        let status = store.to_status();

        let restored = ConditionStore::from_status(Some(&status));
        assert_eq!(restored, store);
        assert!(ConditionStore::from_status(None).conditions().is_empty());
    }
}
