//! Container lifecycle classification

use crate::k8s::{ContainerState, ContainerStatusView, TerminatedState};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

pub const STATE_UNKNOWN: i64 = 0;
pub const STATE_RUNNING: i64 = 1;
pub const STATE_WAITING: i64 = 2;
pub const STATE_TERMINATED: i64 = 3;

/// Status code plus the tags attached to the container status metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStateInfo {
    pub value: i64,
    pub state: &'static str,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub exit_code: Option<i32>,
}

impl ContainerStateInfo {
    pub fn from_state(state: &ContainerState) -> Self {
        match state {
            ContainerState::Running { .. } => Self::bare(STATE_RUNNING, "running"),
            ContainerState::Waiting { reason, message } => Self {
                reason: reason.clone(),
                message: message.clone(),
                ..Self::bare(STATE_WAITING, "waiting")
            },
            ContainerState::Terminated(terminated) => Self::from_termination(terminated),
            ContainerState::Unknown => Self::bare(STATE_UNKNOWN, "unknown"),
        }
    }

    pub fn from_termination(terminated: &TerminatedState) -> Self {
        Self {
            reason: terminated.reason.clone(),
            message: terminated.message.clone(),
            exit_code: Some(terminated.exit_code),
            ..Self::bare(STATE_TERMINATED, "terminated")
        }
    }

    fn bare(value: i64, state: &'static str) -> Self {
        Self {
            value,
            state,
            reason: None,
            message: None,
            exit_code: None,
        }
    }

    /// Secondary labels for the status metric. Empty reason/message are left out.
    pub fn metric_tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("state".to_string(), self.state.to_string());
        if let Some(reason) = self.reason.as_deref().filter(|r| !r.is_empty()) {
            tags.insert("reason".to_string(), reason.to_string());
        }
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            tags.insert("message".to_string(), message.to_string());
        }
        if let Some(code) = self.exit_code {
            tags.insert("exit_code".to_string(), code.to_string());
        }
        tags
    }
}

/// Classify a container for the cycle collected at `collection_time`.
///
/// A termination that finished after the previous cycle ran
/// (`collection_time - interval`) has not been reported yet, so it wins over
/// the current state for this one cycle.
pub fn classify(
    collection_time: DateTime<Utc>,
    interval: Duration,
    status: &ContainerStatusView,
) -> ContainerStateInfo {
    let Some(last) = &status.last_termination else {
        return ContainerStateInfo::from_state(&status.state);
    };
    let Some(finished_at) = last.finished_at else {
        return ContainerStateInfo::from_state(&status.state);
    };

    let last_collection = chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| collection_time.checked_sub_signed(interval));

    match last_collection {
        Some(last_collection) if last_collection >= finished_at => {
            ContainerStateInfo::from_state(&status.state)
        }
        _ => ContainerStateInfo::from_termination(last),
    }
}
