//! Client for a Midjourney-style task-queue vendor.
//!
//! Three endpoints: submit (imagine/blend), status fetch, follow-up action.
//! Submissions return a vendor task id; everything after that goes through
//! the status fetch, which the polling engine drives.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::settings::MidjourneySettings;
use shared::{PollUpdate, TaskButton, TaskError, TaskParams};
use std::sync::LazyLock;
use std::time::Duration;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagineRequest<'a> {
    bot_type: &'a str,
    prompt: &'a str,
    base64_array: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlendRequest<'a> {
    bot_type: &'a str,
    dimensions: &'a str,
    base64_array: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionRequest<'a> {
    custom_id: &'a str,
    task_id: &'a str,
}

// ── Response types ───────────────────────────────────────────────────

/// Answer to any submit call. Code 1 means submitted, 22 queued behind
/// other tasks; anything else is a vendor-reported error and `description`
/// carries the reason.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SubmitResponse {
    code: i64,
    description: String,
    /// The vendor task id on success.
    result: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FetchResponse {
    action: String,
    buttons: Vec<TaskButton>,
    fail_reason: String,
    image_url: String,
    progress: String,
    prompt: String,
    status: String,
}

impl From<FetchResponse> for PollUpdate {
    fn from(res: FetchResponse) -> Self {
        PollUpdate {
            status: res.status,
            progress: res.progress,
            image_url: res.image_url,
            prompt: res.prompt,
            action: res.action,
            fail_reason: res.fail_reason,
            buttons: res.buttons,
        }
    }
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub vendor_task_id: String,
    pub description: String,
}

fn accepted(res: SubmitResponse) -> Result<Submitted> {
    match res.code {
        1 | 22 => Ok(Submitted {
            vendor_task_id: res.result,
            description: res.description,
        }),
        _ => {
            let reason = if res.description.is_empty() {
                format!("submit rejected with code {}", res.code)
            } else {
                res.description
            };
            Err(TaskError::Vendor(reason).into())
        }
    }
}

/// Canvas shape for blend tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendDimensions {
    Square,
    Portrait,
    Landscape,
}

impl BlendDimensions {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendDimensions::Square => "SQUARE",
            BlendDimensions::Portrait => "PORTRAIT",
            BlendDimensions::Landscape => "LANDSCAPE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SQUARE" | "1:1" => Some(BlendDimensions::Square),
            "PORTRAIT" | "2:3" => Some(BlendDimensions::Portrait),
            "LANDSCAPE" | "3:2" => Some(BlendDimensions::Landscape),
            _ => None,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MidjourneyClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl MidjourneyClient {
    pub fn new(settings: &MidjourneySettings) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    /// Submit an imagine task. `prompt` is the already expanded prompt for
    /// `params` (see [`TaskParams::imagine_prompt`]).
    pub async fn submit_imagine(&self, params: &TaskParams, prompt: &str) -> Result<Submitted> {
        let req = ImagineRequest {
            bot_type: params.bot_type.as_str(),
            prompt,
            base64_array: &params.image_refs,
        };
        let url = format!("{}/mj/submit/imagine", self.base_url);
        self.submit(&url, &req).await
    }

    /// Submit a blend task over two or more source images.
    pub async fn submit_blend(
        &self,
        dimensions: BlendDimensions,
        images: &[String],
    ) -> Result<Submitted> {
        let req = BlendRequest {
            bot_type: "MID_JOURNEY",
            dimensions: dimensions.as_str(),
            base64_array: images,
        };
        let url = format!("{}/mj/submit/blend", self.base_url);
        self.submit(&url, &req).await
    }

    /// Submit a follow-up action (variation/upscale button) against an
    /// existing vendor task. Returns the id of the new dependent task.
    pub async fn submit_action(&self, custom_id: &str, vendor_task_id: &str) -> Result<Submitted> {
        let req = ActionRequest {
            custom_id,
            task_id: vendor_task_id,
        };
        let url = format!("{}/mj/submit/action", self.base_url);
        self.submit(&url, &req).await
    }

    /// Fetch current status for a submitted task.
    pub async fn fetch(&self, vendor_task_id: &str) -> Result<PollUpdate> {
        let url = format!("{}/mj/task/{}/fetch", self.base_url, vendor_task_id);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("Authorization", &self.api_key)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TaskError::Vendor(format!("midjourney fetch error: {}", resp.status())).into());
        }
        let body: FetchResponse = resp
            .json()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        Ok(body.into())
    }

    async fn submit<T: Serialize>(&self, url: &str, req: &T) -> Result<Submitted> {
        let resp = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .header("Authorization", &self.api_key)
            .header("X-Requested-With", "XMLHttpRequest")
            .json(req)
            .send()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            if detail.trim().is_empty() {
                return Err(TaskError::Vendor(format!("midjourney error: {}", status)).into());
            }
            return Err(
                TaskError::Vendor(format!("midjourney error: {}\n{}", status, detail)).into(),
            );
        }
        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        tracing::debug!(code = body.code, "midjourney submit answered");
        accepted(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_code_1_is_accepted() {
        let res: SubmitResponse =
            serde_json::from_str(r#"{"code":1,"description":"Submit success","result":"17201924"}"#)
                .unwrap();
        let submitted = accepted(res).unwrap();
        assert_eq!(submitted.vendor_task_id, "17201924");
    }

    #[test]
    fn submit_code_22_counts_as_queued() {
        let res: SubmitResponse = serde_json::from_str(
            r#"{"code":22,"description":"In queue, there are 3 tasks ahead","result":"9"}"#,
        )
        .unwrap();
        assert!(accepted(res).is_ok());
    }

    #[test]
    fn submit_error_code_is_a_vendor_error() {
        let res: SubmitResponse =
            serde_json::from_str(r#"{"code":24,"description":"banned prompt","result":""}"#)
                .unwrap();
        let err = accepted(res).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>(),
            Some(TaskError::Vendor(reason)) if reason == "banned prompt"
        ));
        assert!(err.to_string().contains("banned prompt"));
    }

    #[test]
    fn fetch_response_maps_to_poll_update() {
        let res: FetchResponse = serde_json::from_str(
            r#"{
                "action": "IMAGINE",
                "status": "IN_PROGRESS",
                "progress": "62%",
                "imageUrl": "https://cdn/partial.png",
                "prompt": "a red fox --aspect 16:9",
                "failReason": "",
                "buttons": [
                    {"customId": "MJ::JOB::upsample::1::abc", "emoji": "", "label": "U1", "style": 2, "type": 2}
                ]
            }"#,
        )
        .unwrap();
        let update: PollUpdate = res.into();
        assert_eq!(update.status, "IN_PROGRESS");
        assert_eq!(update.progress, "62%");
        assert_eq!(update.image_url, "https://cdn/partial.png");
        assert_eq!(update.buttons.len(), 1);
        assert_eq!(update.buttons[0].custom_id, "MJ::JOB::upsample::1::abc");
        assert_eq!(update.buttons[0].label, "U1");
    }

    #[test]
    fn fetch_response_tolerates_missing_fields() {
        let res: FetchResponse = serde_json::from_str(r#"{"status":""}"#).unwrap();
        let update: PollUpdate = res.into();
        assert_eq!(update.status, "");
        assert!(update.buttons.is_empty());
    }

    #[test]
    fn blend_dimensions_parse_aliases() {
        assert_eq!(
            BlendDimensions::parse("2:3"),
            Some(BlendDimensions::Portrait)
        );
        assert_eq!(
            BlendDimensions::parse("square"),
            Some(BlendDimensions::Square)
        );
        assert_eq!(BlendDimensions::parse("4:7"), None);
    }
}
