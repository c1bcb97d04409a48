//! Application settings, persisted as JSON by the app crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidjourneySettings {
    pub base_url: String,
    pub api_key: String,
}

impl Default for MidjourneySettings {
    fn default() -> Self {
        Self {
            base_url: "https://mj.openai-next.com".into(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilitySettings {
    pub base_url: String,
    pub api_key: String,
    /// Generation endpoint variant: "core", "ultra" or "sd3".
    pub model: String,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.stability.ai".into(),
            api_key: String::new(),
            model: "core".into(),
        }
    }
}

/// One streaming chat vendor endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Fixed tick interval for the polling engine.
    pub interval_secs: u64,
    /// How long a task may sit without a vendor task id before it is
    /// force-failed instead of polled forever.
    pub grace_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            grace_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppSettings {
    pub midjourney: MidjourneySettings,
    pub stability: StabilitySettings,
    pub qwen: ChatEndpoint,
    pub ernie: ChatEndpoint,
    pub poll: PollSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_tolerate_missing_fields() {
        let settings: AppSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.poll.grace_secs, 20);
        assert!(settings.midjourney.base_url.starts_with("https://"));
    }

    #[test]
    fn settings_round_trip() {
        let mut settings = AppSettings::default();
        settings.qwen.model = "qwen-turbo".into();
        let json = serde_json::to_string(&settings).unwrap();
        let back: AppSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.qwen.model, "qwen-turbo");
    }
}
