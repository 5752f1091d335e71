//! Shop-configurable order status flow.
//!
//! A flow is a directed graph of integer status codes loaded from JSON. Codes
//! carry no meaning to the engine beyond what the graph says: they need not be
//! contiguous and may be negative.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATUS_NONE: i32 = 0;
pub const STATUS_PENDING: i32 = 1;
pub const STATUS_ACCEPTED: i32 = 2;
pub const STATUS_REJECTED: i32 = 3;
pub const STATUS_SHIPPED: i32 = 4;
pub const STATUS_COMPLETE: i32 = 10;
pub const STATUS_CANCELED: i32 = -1;

/// Entering one of these returns the order's items to stock.
pub const STOCK_RESTORING_STATUSES: [i32; 2] = [STATUS_REJECTED, STATUS_CANCELED];

/// Orders in these states may not be deleted.
pub const UNDELETABLE_STATUSES: [i32; 2] = [STATUS_COMPLETE, STATUS_CANCELED];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusFlow {
    pub statuses: Vec<StatusState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusState {
    pub value: i32,
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub actions: Vec<StatusAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAction {
    pub name: String,
    pub next_status: i32,
    #[serde(default)]
    pub next_status_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("status flow is not valid JSON: {0}")]
    Malformed(String),
    #[error("status flow has no statuses")]
    Empty,
    #[error("status {0} is declared more than once")]
    DuplicateStatus(i32),
    #[error("status flow must declare the initial status {STATUS_PENDING}")]
    MissingInitial,
    #[error("status {0} uses the reserved code {STATUS_NONE}")]
    ReservedStatus(i32),
    #[error("status {from} has an action to undeclared status {to}")]
    UnknownTarget { from: i32, to: i32 },
    #[error("status {0} has an action back to itself")]
    SelfTransition(i32),
    #[error("final status {0} must not declare actions")]
    FinalWithActions(i32),
}

impl OrderStatusFlow {
    pub fn parse(json: &str) -> Result<Self, FlowError> {
        let flow: OrderStatusFlow =
            serde_json::from_str(json).map_err(|e| FlowError::Malformed(e.to_string()))?;
        flow.validate()?;
        Ok(flow)
    }

    /// Structural checks. Reachability is not required and cycles are allowed.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.statuses.is_empty() {
            return Err(FlowError::Empty);
        }
        let mut declared = HashSet::new();
        for state in &self.statuses {
            if state.value == STATUS_NONE {
                return Err(FlowError::ReservedStatus(state.value));
            }
            if !declared.insert(state.value) {
                return Err(FlowError::DuplicateStatus(state.value));
            }
        }
        if !declared.contains(&STATUS_PENDING) {
            return Err(FlowError::MissingInitial);
        }
        for state in &self.statuses {
            if state.is_final && !state.actions.is_empty() {
                return Err(FlowError::FinalWithActions(state.value));
            }
            for action in &state.actions {
                if action.next_status == state.value {
                    return Err(FlowError::SelfTransition(state.value));
                }
                if !declared.contains(&action.next_status) {
                    return Err(FlowError::UnknownTarget { from: state.value, to: action.next_status });
                }
            }
        }
        Ok(())
    }

    pub fn state(&self, value: i32) -> Option<&StatusState> {
        self.statuses.iter().find(|s| s.value == value)
    }

    pub fn can_transition(&self, from: i32, to: i32) -> bool {
        if from == to {
            return false;
        }
        match self.state(from) {
            Some(state) if !state.is_final => state.actions.iter().any(|a| a.next_status == to),
            _ => false,
        }
    }

    pub fn is_final(&self, status: i32) -> bool {
        self.state(status).is_some_and(|s| s.is_final)
    }

    /// Every non-final status; the "open orders" filter.
    pub fn unfinished_statuses(&self) -> BTreeSet<i32> {
        self.statuses
            .iter()
            .filter(|s| !s.is_final)
            .map(|s| s.value)
            .collect()
    }

    pub fn to_json(&self) -> String {
        // Serializing plain structs of strings/ints/bools cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Default for OrderStatusFlow {
    fn default() -> Self {
        fn action(name: &str, next_status: i32, label: &str) -> StatusAction {
            StatusAction { name: name.into(), next_status, next_status_label: label.into() }
        }
        fn state(value: i32, label: &str, kind: &str, is_final: bool, actions: Vec<StatusAction>) -> StatusState {
            StatusState { value, label: label.into(), kind: kind.into(), is_final, actions }
        }

        Self {
            statuses: vec![
                state(
                    STATUS_PENDING,
                    "Pending",
                    "warning",
                    false,
                    vec![
                        action("accept", STATUS_ACCEPTED, "Accepted"),
                        action("reject", STATUS_REJECTED, "Rejected"),
                    ],
                ),
                state(
                    STATUS_ACCEPTED,
                    "Accepted",
                    "primary",
                    false,
                    vec![
                        action("ship", STATUS_SHIPPED, "Shipped"),
                        action("cancel", STATUS_CANCELED, "Canceled"),
                    ],
                ),
                state(STATUS_REJECTED, "Rejected", "danger", true, vec![]),
                state(
                    STATUS_SHIPPED,
                    "Shipped",
                    "info",
                    false,
                    vec![action("complete", STATUS_COMPLETE, "Complete")],
                ),
                state(STATUS_COMPLETE, "Complete", "success", true, vec![]),
                state(STATUS_CANCELED, "Canceled", "info", true, vec![]),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flow_is_valid() {
        assert_eq!(OrderStatusFlow::default().validate(), Ok(()));
    }

    #[test]
    fn default_flow_transitions() {
        let flow = OrderStatusFlow::default();
        assert!(flow.can_transition(STATUS_PENDING, STATUS_ACCEPTED));
        assert!(flow.can_transition(STATUS_PENDING, STATUS_REJECTED));
        assert!(!flow.can_transition(STATUS_PENDING, STATUS_COMPLETE));
        assert!(flow.can_transition(STATUS_ACCEPTED, STATUS_SHIPPED));
        assert!(flow.can_transition(STATUS_ACCEPTED, STATUS_CANCELED));
        assert!(flow.can_transition(STATUS_SHIPPED, STATUS_COMPLETE));
        assert!(!flow.can_transition(STATUS_COMPLETE, STATUS_PENDING));
        assert!(!flow.can_transition(42, STATUS_PENDING));
    }

    #[test]
    fn default_flow_finals() {
        let flow = OrderStatusFlow::default();
        for code in [STATUS_REJECTED, STATUS_COMPLETE, STATUS_CANCELED] {
            assert!(flow.is_final(code), "{code} should be final");
        }
        assert!(!flow.is_final(STATUS_PENDING));
        assert!(!flow.is_final(99));
        assert_eq!(
            flow.unfinished_statuses().into_iter().collect::<Vec<_>>(),
            vec![STATUS_PENDING, STATUS_ACCEPTED, STATUS_SHIPPED]
        );
    }

    #[test]
    fn parses_camel_case_json() {
        let json = r#"{"statuses":[
            {"value":1,"label":"New","type":"warning","isFinal":false,
             "actions":[{"name":"done","nextStatus":-7,"nextStatusLabel":"Done"}]},
            {"value":-7,"label":"Done","type":"success","isFinal":true,"actions":[]}
        ]}"#;
        let flow = OrderStatusFlow::parse(json).unwrap();
        assert!(flow.can_transition(1, -7));
        assert!(flow.is_final(-7));
        assert_eq!(flow.unfinished_statuses().len(), 1);

        let round_trip = OrderStatusFlow::parse(&flow.to_json()).unwrap();
        assert_eq!(round_trip, flow);
        assert!(flow.to_json().contains("\"nextStatus\":-7"));
        assert!(flow.to_json().contains("\"isFinal\":true"));
    }

    #[test]
    fn cycles_and_unreachable_states_are_allowed() {
        let json = r#"{"statuses":[
            {"value":1,"label":"A","actions":[{"name":"b","nextStatus":2}]},
            {"value":2,"label":"B","actions":[{"name":"a","nextStatus":1}]},
            {"value":5,"label":"Orphan","isFinal":true}
        ]}"#;
        let flow = OrderStatusFlow::parse(json).unwrap();
        assert!(flow.can_transition(1, 2));
        assert!(flow.can_transition(2, 1));
    }

    #[test]
    fn rejects_structural_errors() {
        let cases = [
            (r#"{"statuses":[]}"#, FlowError::Empty),
            (
                r#"{"statuses":[{"value":1,"label":"a"},{"value":1,"label":"b"}]}"#,
                FlowError::DuplicateStatus(1),
            ),
            (r#"{"statuses":[{"value":2,"label":"a"}]}"#, FlowError::MissingInitial),
            (
                r#"{"statuses":[{"value":1,"label":"a","actions":[{"name":"x","nextStatus":9}]}]}"#,
                FlowError::UnknownTarget { from: 1, to: 9 },
            ),
            (
                r#"{"statuses":[{"value":1,"label":"a","actions":[{"name":"x","nextStatus":1}]}]}"#,
                FlowError::SelfTransition(1),
            ),
            (
                r#"{"statuses":[{"value":1,"label":"a","actions":[{"name":"x","nextStatus":2}]},
                   {"value":2,"label":"b","isFinal":true,"actions":[{"name":"y","nextStatus":1}]}]}"#,
                FlowError::FinalWithActions(2),
            ),
            (r#"{"statuses":[{"value":0,"label":"a"}]}"#, FlowError::ReservedStatus(0)),
        ];
        for (json, expected) in cases {
            assert_eq!(OrderStatusFlow::parse(json), Err(expected), "{json}");
        }
        assert!(matches!(OrderStatusFlow::parse("{"), Err(FlowError::Malformed(_))));
    }
}
