//! One-shot image generation against a Stability-style endpoint.
//!
//! No task queue here: the response already carries the image (or the
//! error), so records created for these jobs go terminal immediately.

use anyhow::Result;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::Deserialize;
use shared::settings::StabilitySettings;
use shared::TaskError;
use std::sync::LazyLock;
use std::time::Duration;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GenerateResponse {
    errors: Vec<String>,
    finish_reason: String,
    /// Base64 image payload on success.
    image: String,
}

fn outcome(res: GenerateResponse) -> Result<String> {
    if let Some(first) = res.errors.first() {
        return Err(TaskError::Vendor(first.clone()).into());
    }
    if res.finish_reason == "SUCCESS" {
        return Ok(res.image);
    }
    Err(TaskError::Vendor(format!(
        "generation did not finish: finish_reason={:?}",
        res.finish_reason
    ))
    .into())
}

pub struct StabilityClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl StabilityClient {
    pub fn new(settings: &StabilitySettings) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    /// Generate one image. `fields` go out verbatim as form fields; returns
    /// the base64 image payload.
    pub async fn generate(&self, fields: &[(String, String)]) -> Result<String> {
        let url = format!(
            "{}/v2beta/stable-image/generate/{}",
            self.base_url, self.model
        );
        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }
        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            if detail.trim().is_empty() {
                return Err(TaskError::Vendor(format!("stability error: {}", status)).into());
            }
            return Err(
                TaskError::Vendor(format!("stability error: {}\n{}", status, detail)).into(),
            );
        }
        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| TaskError::Transport(e.to_string()))?;
        outcome(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_yields_image_payload() {
        let res: GenerateResponse =
            serde_json::from_str(r#"{"finish_reason":"SUCCESS","image":"aGVsbG8="}"#).unwrap();
        assert_eq!(outcome(res).unwrap(), "aGVsbG8=");
    }

    #[test]
    fn first_error_wins_as_a_vendor_error() {
        let res: GenerateResponse =
            serde_json::from_str(r#"{"errors":["invalid prompt","other"],"image":""}"#).unwrap();
        let err = outcome(res).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>(),
            Some(TaskError::Vendor(reason)) if reason == "invalid prompt"
        ));
    }

    #[test]
    fn content_filter_is_an_error() {
        let res: GenerateResponse =
            serde_json::from_str(r#"{"finish_reason":"CONTENT_FILTERED","image":""}"#).unwrap();
        assert!(outcome(res).is_err());
    }
}
