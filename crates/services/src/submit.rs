//! Task submission: validate, persist the record, post to the vendor,
//! record the outcome.
//!
//! The record is written before the outbound call so a crash mid-submit
//! still leaves a visible entry; the poller's grace window cleans up
//! entries whose submission never produced a vendor id.

use anyhow::Result;
use providers::{BlendDimensions, MidjourneyClient, StabilityClient};
use shared::{TaskError, TaskParams, TaskRecord, TaskStatus};
use std::sync::Arc;

use crate::store::TaskStore;

pub struct SubmissionService {
    store: Arc<TaskStore>,
    client: MidjourneyClient,
}

impl SubmissionService {
    pub fn new(store: Arc<TaskStore>, client: MidjourneyClient) -> Self {
        Self { store, client }
    }

    /// Submit an imagine task. An empty prompt errors out before any record
    /// is created or any request goes out.
    pub async fn submit_imagine(&self, params: TaskParams) -> Result<TaskRecord> {
        let prompt = params.imagine_prompt()?;

        let mut rec = TaskRecord::new(params, prompt.clone());
        rec.id = self.store.add(&rec)?;

        match self.client.submit_imagine(&rec.params, &prompt).await {
            Ok(submitted) => {
                rec.vendor_task_id = submitted.vendor_task_id;
                tracing::info!(id = rec.id, vendor = %rec.vendor_task_id, "imagine submitted");
            }
            Err(e) => {
                rec = rec.failed(e.to_string());
                tracing::warn!(id = rec.id, error = %rec.error, "imagine submit failed");
            }
        }
        self.store.update(&rec)?;
        Ok(rec)
    }

    /// Submit a blend over the given base64 images.
    pub async fn submit_blend(
        &self,
        dimensions: BlendDimensions,
        images: Vec<String>,
    ) -> Result<TaskRecord> {
        if images.is_empty() {
            return Err(TaskError::NoBlendImages.into());
        }

        let params = TaskParams {
            image_refs: images.clone(),
            ..TaskParams::default()
        };
        let mut rec = TaskRecord::new(params, "BLEND".into());
        rec.id = self.store.add(&rec)?;

        match self.client.submit_blend(dimensions, &images).await {
            Ok(submitted) => {
                rec.vendor_task_id = submitted.vendor_task_id;
                tracing::info!(id = rec.id, vendor = %rec.vendor_task_id, "blend submitted");
            }
            Err(e) => {
                rec = rec.failed(e.to_string());
                tracing::warn!(id = rec.id, error = %rec.error, "blend submit failed");
            }
        }
        self.store.update(&rec)?;
        Ok(rec)
    }
}

/// One-shot generation: the vendor answers with the image directly, so the
/// record goes terminal on response and never enters the polling loop.
pub async fn submit_one_shot(
    store: &TaskStore,
    client: &StabilityClient,
    prompt: &str,
    extra_fields: &[(String, String)],
) -> Result<TaskRecord> {
    if prompt.trim().is_empty() {
        return Err(TaskError::EmptyPrompt.into());
    }

    let params = TaskParams {
        text_prompt: prompt.trim().to_string(),
        ..TaskParams::default()
    };
    let mut rec = TaskRecord::new(params, prompt.trim().to_string());
    rec.bot_type = "STABILITY".into();
    rec.id = store.add(&rec)?;

    let mut fields = vec![("prompt".to_string(), prompt.trim().to_string())];
    fields.extend_from_slice(extra_fields);

    match client.generate(&fields).await {
        Ok(image) => {
            rec.status = TaskStatus::Success;
            rec.progress = "100%".into();
            // Base64 payload; callers decide how to materialize it.
            rec.result_url = image;
        }
        Err(e) => {
            rec = rec.failed(e.to_string());
        }
    }
    store.update(&rec)?;
    Ok(rec)
}
