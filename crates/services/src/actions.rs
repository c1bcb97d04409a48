//! Follow-up action dispatch (variation/upscale buttons).
//!
//! An action spawns a new dependent task: a fresh record is written first,
//! then the action is posted against the originating vendor task. Success
//! attaches the new vendor id so the polling engine picks the task up;
//! failure marks the new record FAILURE and leaves the origin alone.

use anyhow::{anyhow, Result};
use providers::MidjourneyClient;
use shared::TaskRecord;
use std::sync::Arc;

use crate::store::TaskStore;

pub struct ActionDispatcher {
    store: Arc<TaskStore>,
    client: MidjourneyClient,
}

impl ActionDispatcher {
    pub fn new(store: Arc<TaskStore>, client: MidjourneyClient) -> Self {
        Self { store, client }
    }

    pub async fn dispatch(&self, origin_id: i64, custom_id: &str) -> Result<TaskRecord> {
        let origin = self
            .store
            .get(origin_id)?
            .ok_or_else(|| anyhow!("task {} not found", origin_id))?;
        if origin.vendor_task_id.is_empty() {
            return Err(anyhow!("task {} has no vendor task id", origin_id));
        }

        // Prefer the button label for display; the custom id is opaque.
        let label = origin
            .buttons
            .iter()
            .find(|b| b.custom_id == custom_id)
            .map(|b| b.label.clone())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| custom_id.to_string());

        let mut rec = TaskRecord::new(origin.params.clone(), label);
        rec.bot_type = origin.bot_type.clone();
        rec.id = self.store.add(&rec)?;

        match self
            .client
            .submit_action(custom_id, &origin.vendor_task_id)
            .await
        {
            Ok(submitted) => {
                rec.vendor_task_id = submitted.vendor_task_id;
                tracing::info!(
                    id = rec.id,
                    origin = origin_id,
                    vendor = %rec.vendor_task_id,
                    "action submitted"
                );
            }
            Err(e) => {
                rec = rec.failed(e.to_string());
                tracing::warn!(id = rec.id, error = %rec.error, "action submit failed");
            }
        }
        self.store.update(&rec)?;
        Ok(rec)
    }
}
