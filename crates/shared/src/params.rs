//! User-facing generation parameters and prompt expansion.
//!
//! The vendor takes a single prompt string with ` --flag value` suffixes.
//! In default mode only knobs that differ from the documented defaults are
//! appended, so vendor-side defaults are never overridden by accident. In
//! custom mode every knob is passed through verbatim.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BotType {
    #[default]
    #[serde(rename = "MID_JOURNEY")]
    Midjourney,
    #[serde(rename = "NIJI_JOURNEY")]
    Niji,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotType::Midjourney => "MID_JOURNEY",
            BotType::Niji => "NIJI_JOURNEY",
        }
    }
}

/// Imagine-task knobs. Immutable once a task has been submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    pub bot_type: BotType,
    pub version: String,
    pub text_prompt: String,
    /// Negative prompt (`--no`).
    pub no: String,
    pub quality: String,
    pub aspect: String,
    pub style: String,
    pub chaos: u32,
    pub stop: u32,
    pub stylize: u32,
    /// Base64 pad images sent alongside the prompt.
    pub image_refs: Vec<String>,
    /// Pad-image weight, only meaningful when `image_refs` is non-empty.
    pub iw: f64,
    pub seed: u32,
    /// Pass all knobs through verbatim instead of diffing against defaults.
    pub custom_param: bool,
    pub weird: u32,
    pub tile: bool,
    /// Character reference image URLs (`--cref`).
    pub cref_urls: Vec<String>,
    /// Character reference weight, only meaningful with `cref_urls`.
    pub cw: u32,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            bot_type: BotType::Midjourney,
            version: "6".into(),
            text_prompt: String::new(),
            no: String::new(),
            quality: "1".into(),
            aspect: "1:1".into(),
            style: "raw".into(),
            chaos: 0,
            stop: 100,
            stylize: 100,
            image_refs: Vec::new(),
            iw: 1.0,
            seed: 0,
            custom_param: false,
            weird: 0,
            tile: false,
            cref_urls: Vec::new(),
            cw: 1,
        }
    }
}

impl TaskParams {
    /// Expand the knobs into the full vendor prompt string.
    ///
    /// Errors when the required prompt text is empty; callers must not
    /// create a record or issue a request in that case.
    pub fn imagine_prompt(&self) -> Result<String, TaskError> {
        if self.text_prompt.trim().is_empty() {
            return Err(TaskError::EmptyPrompt);
        }

        let defaults = TaskParams::default();
        let mut prompt = self.text_prompt.trim().to_string();
        let all = self.custom_param;

        if all || self.aspect != defaults.aspect {
            prompt.push_str(&format!(" --aspect {}", self.aspect));
        }
        if all || self.version != defaults.version {
            prompt.push_str(&format!(" --version {}", self.version));
        }
        if all || self.quality != defaults.quality {
            prompt.push_str(&format!(" --quality {}", self.quality));
        }
        if all || self.style != defaults.style {
            prompt.push_str(&format!(" --style {}", self.style));
        }
        if !self.no.is_empty() {
            prompt.push_str(&format!(" --no {}", self.no));
        }
        if all || self.chaos != defaults.chaos {
            prompt.push_str(&format!(" --chaos {}", self.chaos));
        }
        if all || self.stylize != defaults.stylize {
            prompt.push_str(&format!(" --stylize {}", self.stylize));
        }
        if all || self.stop != defaults.stop {
            prompt.push_str(&format!(" --stop {}", self.stop));
        }
        if self.tile {
            prompt.push_str(" --tile");
        }
        if all || self.seed != defaults.seed {
            prompt.push_str(&format!(" --seed {}", self.seed));
        }
        if !self.image_refs.is_empty() && (all || (self.iw - defaults.iw).abs() > f64::EPSILON) {
            prompt.push_str(&format!(" --iw {}", self.iw));
        }
        if all || self.weird != defaults.weird {
            prompt.push_str(&format!(" --weird {}", self.weird));
        }
        // Regular image prompts must come before --cref, so this goes last.
        if !self.cref_urls.is_empty() {
            prompt.push_str(&format!(" --cref {}", self.cref_urls.join(" ")));
            if all || self.cw != defaults.cw {
                prompt.push_str(&format!(" --cw {}", self.cw));
            }
        }

        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_prompt(text: &str) -> TaskParams {
        TaskParams {
            text_prompt: text.into(),
            ..TaskParams::default()
        }
    }

    #[test]
    fn default_mode_emits_only_the_prompt() {
        let params = with_prompt("a red fox");
        assert_eq!(params.imagine_prompt().unwrap(), "a red fox");
    }

    #[test]
    fn default_mode_emits_changed_knobs() {
        let mut params = with_prompt("a red fox");
        params.aspect = "16:9".into();
        params.chaos = 83;
        params.tile = true;
        assert_eq!(
            params.imagine_prompt().unwrap(),
            "a red fox --aspect 16:9 --chaos 83 --tile"
        );
    }

    #[test]
    fn custom_mode_passes_defaults_through() {
        let mut params = with_prompt("a red fox");
        params.custom_param = true;
        params.chaos = 50;
        let prompt = params.imagine_prompt().unwrap();
        // chaos appears explicitly even though everything else is default
        assert!(prompt.contains("--chaos 50"));
        assert!(prompt.contains("--aspect 1:1"));
        assert!(prompt.contains("--version 6"));
        assert!(prompt.contains("--stylize 100"));
        assert!(prompt.contains("--style raw"));
        assert!(prompt.contains("--stop 100"));
    }

    #[test]
    fn style_and_stop_emitted_when_changed() {
        let mut params = with_prompt("a red fox");
        params.style = "cute".into();
        params.stop = 80;
        assert_eq!(
            params.imagine_prompt().unwrap(),
            "a red fox --style cute --stop 80"
        );
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let params = with_prompt("   ");
        assert!(matches!(
            params.imagine_prompt(),
            Err(TaskError::EmptyPrompt)
        ));
    }

    #[test]
    fn negative_prompt_always_included_when_set() {
        let mut params = with_prompt("portrait");
        params.no = "hands".into();
        assert_eq!(params.imagine_prompt().unwrap(), "portrait --no hands");
    }

    #[test]
    fn cref_urls_come_last() {
        let mut params = with_prompt("knight");
        params.cref_urls = vec!["https://a/1.png".into(), "https://a/2.png".into()];
        params.cw = 46;
        params.seed = 12;
        assert_eq!(
            params.imagine_prompt().unwrap(),
            "knight --seed 12 --cref https://a/1.png https://a/2.png --cw 46"
        );
    }

    #[test]
    fn params_round_trip_through_json() {
        let mut params = with_prompt("a red fox");
        params.seed = 42;
        params.image_refs = vec!["base64data".into()];
        let json = serde_json::to_string(&params).unwrap();
        let back: TaskParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
