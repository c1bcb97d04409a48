//! Task records and the pure poll-merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::TaskParams;

/// Lifecycle state of a tracked generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    Submitted,
    InProgress,
    Success,
    Failure,
    LoadingError,
}

impl TaskStatus {
    /// Terminal tasks are never polled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    /// Lenient parse of a vendor status string.
    ///
    /// The vendor reports `NOT_START` for queued-but-idle tasks and an empty
    /// string before the task is picked up at all; both map to `NotStarted`,
    /// as does anything unrecognized.
    pub fn from_vendor(s: &str) -> Self {
        match s {
            "SUBMITTED" => TaskStatus::Submitted,
            "IN_PROGRESS" => TaskStatus::InProgress,
            "SUCCESS" => TaskStatus::Success,
            "FAILURE" => TaskStatus::Failure,
            "LOADING_ERROR" => TaskStatus::LoadingError,
            _ => TaskStatus::NotStarted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::LoadingError => "LOADING_ERROR",
        }
    }
}

/// A follow-up action button offered by the vendor (variation, upscale...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskButton {
    pub custom_id: String,
    pub emoji: String,
    pub label: String,
    pub style: i32,
    #[serde(rename = "type")]
    pub kind: i32,
}

/// Vendor-neutral view of one status poll response.
///
/// Provider clients decode the vendor JSON into this; the merge below is the
/// only thing that touches stored records, so it stays testable without
/// network or storage.
#[derive(Debug, Clone, Default)]
pub struct PollUpdate {
    /// Raw vendor status string; empty means not started.
    pub status: String,
    pub progress: String,
    pub image_url: String,
    pub prompt: String,
    /// Vendor task type name (IMAGINE, UPSCALE...), used as a prompt
    /// fallback for action tasks that carry no prompt of their own.
    pub action: String,
    pub fail_reason: String,
    pub buttons: Vec<TaskButton>,
}

/// One tracked generation request and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Locally assigned id, stable for the record's lifetime.
    pub id: i64,
    pub status: TaskStatus,
    /// Upstream correlation id; empty until submission succeeds.
    pub vendor_task_id: String,
    pub bot_type: String,
    /// The expanded prompt actually sent to the vendor.
    pub prompt: String,
    pub params: TaskParams,
    pub progress: String,
    pub result_url: String,
    pub buttons: Vec<TaskButton>,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Fresh record for a submission about to go out.
    pub fn new(params: TaskParams, prompt: String) -> Self {
        Self {
            id: 0,
            status: TaskStatus::Submitted,
            vendor_task_id: String::new(),
            bot_type: params.bot_type.as_str().to_string(),
            prompt,
            params,
            progress: "0%".into(),
            result_url: String::new(),
            buttons: Vec::new(),
            error: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Apply a poll response, producing the record to store.
    ///
    /// Terminal states are sticky: once a record is SUCCESS or FAILURE a
    /// stale in-flight poll cannot move it back, so the update is dropped
    /// wholesale.
    pub fn merged(&self, update: &PollUpdate) -> TaskRecord {
        if self.status.is_terminal() {
            return self.clone();
        }

        let mut next = self.clone();
        next.status = TaskStatus::from_vendor(&update.status);
        if !update.progress.is_empty() {
            next.progress = update.progress.clone();
        }
        if !update.image_url.is_empty() {
            next.result_url = update.image_url.clone();
        }
        if !update.prompt.is_empty() {
            next.prompt = update.prompt.clone();
        } else if !update.action.is_empty() {
            next.prompt = update.action.clone();
        }
        if !update.buttons.is_empty() {
            next.buttons = update.buttons.clone();
        }
        if !update.fail_reason.is_empty() {
            next.error = update.fail_reason.clone();
        }
        next
    }

    /// Mark the record failed with the given error text.
    pub fn failed(&self, error: impl Into<String>) -> TaskRecord {
        let mut next = self.clone();
        next.status = TaskStatus::Failure;
        next.error = error.into();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TaskParams;

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskParams {
                text_prompt: "a red fox".into(),
                ..TaskParams::default()
            },
            "a red fox".into(),
        )
    }

    #[test]
    fn empty_vendor_status_merges_to_not_started() {
        let rec = record();
        let merged = rec.merged(&PollUpdate::default());
        assert_eq!(merged.status, TaskStatus::NotStarted);
    }

    #[test]
    fn unknown_vendor_status_merges_to_not_started() {
        let rec = record();
        let update = PollUpdate {
            status: "MODAL".into(),
            ..PollUpdate::default()
        };
        assert_eq!(rec.merged(&update).status, TaskStatus::NotStarted);
    }

    #[test]
    fn progress_and_result_carry_over() {
        let rec = record();
        let update = PollUpdate {
            status: "IN_PROGRESS".into(),
            progress: "44%".into(),
            image_url: "https://img/partial.png".into(),
            ..PollUpdate::default()
        };
        let merged = rec.merged(&update);
        assert_eq!(merged.status, TaskStatus::InProgress);
        assert_eq!(merged.progress, "44%");
        assert_eq!(merged.result_url, "https://img/partial.png");
        // fields the vendor omitted stay put
        assert_eq!(merged.prompt, "a red fox");
    }

    #[test]
    fn prompt_falls_back_to_action_name() {
        let rec = record();
        let update = PollUpdate {
            status: "IN_PROGRESS".into(),
            action: "UPSCALE".into(),
            ..PollUpdate::default()
        };
        assert_eq!(rec.merged(&update).prompt, "UPSCALE");
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut rec = record();
        rec.status = TaskStatus::Failure;
        rec.error = "boom".into();
        let update = PollUpdate {
            status: "IN_PROGRESS".into(),
            progress: "10%".into(),
            ..PollUpdate::default()
        };
        let merged = rec.merged(&update);
        assert_eq!(merged.status, TaskStatus::Failure);
        assert_eq!(merged.error, "boom");
        assert_eq!(merged.progress, rec.progress);
    }

    #[test]
    fn fail_reason_lands_in_error() {
        let rec = record();
        let update = PollUpdate {
            status: "FAILURE".into(),
            fail_reason: "banned prompt".into(),
            ..PollUpdate::default()
        };
        let merged = rec.merged(&update);
        assert_eq!(merged.status, TaskStatus::Failure);
        assert_eq!(merged.error, "banned prompt");
    }

    #[test]
    fn status_wire_format_is_screaming_snake() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let back: TaskStatus = serde_json::from_str("\"NOT_STARTED\"").unwrap();
        assert_eq!(back, TaskStatus::NotStarted);
    }

    #[test]
    fn vendor_not_start_spelling_is_accepted() {
        assert_eq!(TaskStatus::from_vendor("NOT_START"), TaskStatus::NotStarted);
        assert_eq!(TaskStatus::from_vendor(""), TaskStatus::NotStarted);
    }
}
