use serde::{Deserialize, Serialize};

/// Upper bound on simulated agents per job.
pub const MAX_BOT_COUNT: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One atomic automation action. Tag values match the persisted wire
/// format; selectors stay optional here so that a missing selector is
/// surfaced at execution time as a run failure, not a parse error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Step {
    Fill {
        selector: Option<String>,
        value: Option<String>,
    },
    Click {
        selector: Option<String>,
    },
    Wait {
        selector: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Screenshot,
    Pause,
    /// Catch-all for step tags newer than this binary understands.
    /// Executing one fails the agent with an unsupported-action error.
    #[serde(other)]
    Unknown,
}

impl Step {
    pub fn action_name(&self) -> &'static str {
        match self {
            Step::Fill { .. } => "fill",
            Step::Click { .. } => "click",
            Step::Wait { .. } => "wait",
            Step::Screenshot => "screenshot",
            Step::Pause => "pause",
            Step::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProxyConfig {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bypass: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub user_agent: Option<String>,
    pub viewport: Option<Viewport>,
    pub device_scale_factor: Option<f64>,
    pub is_mobile: Option<bool>,
    pub has_touch: Option<bool>,
    pub locale: Option<String>,
    pub timezone_id: Option<String>,
    pub geolocation: Option<Geolocation>,
    pub permissions: Option<Vec<String>>,
}

impl DeviceConfig {
    /// Looks up a device profile by its catalogue name.
    pub fn preset(name: &str) -> Option<DeviceConfig> {
        let (ua, width, height, scale, mobile) = match name {
            "desktop-chrome" => (
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                1920, 1080, 1.0, false,
            ),
            "mobile-iphone" => (
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
                375, 812, 3.0, true,
            ),
            "mobile-android" => (
                "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
                360, 800, 2.75, true,
            ),
            "tablet-ipad" => (
                "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
                768, 1024, 2.0, true,
            ),
            _ => return None,
        };
        Some(DeviceConfig {
            user_agent: Some(ua.to_string()),
            viewport: Some(Viewport { width, height }),
            device_scale_factor: Some(scale),
            is_mobile: Some(mobile),
            has_touch: Some(mobile),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiBotConfig {
    pub enabled: bool,
    #[serde(default = "default_bot_count")]
    pub count: u32,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub delay_between_bots_ms: u64,
    #[serde(default)]
    pub randomize_order: bool,
}

fn default_bot_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisualModeConfig {
    pub enabled: bool,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub slow_mo_ms: u64,
    #[serde(default)]
    pub pause_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub proxy: Option<ProxyConfig>,
    pub device: Option<DeviceConfig>,
    #[serde(default)]
    pub fingerprint_masking: bool,
    pub multi_bot: Option<MultiBotConfig>,
    pub visual_mode: Option<VisualModeConfig>,
}

/// Immutable automation task definition. Never mutated after submission;
/// every run derived from it reads the same url/steps/config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub config: Option<JobConfig>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("job url must not be empty")]
    EmptyUrl,
    #[error("job must have at least one step")]
    NoSteps,
    #[error("multi-bot count must be between 1 and {MAX_BOT_COUNT}, got {0}")]
    BotCountOutOfRange(u32),
}

impl Job {
    /// Rejects malformed jobs before any run exists.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps);
        }
        if let Some(multi) = self.config.as_ref().and_then(|c| c.multi_bot.as_ref()) {
            if multi.enabled && !(1..=MAX_BOT_COUNT).contains(&multi.count) {
                return Err(ValidationError::BotCountOutOfRange(multi.count));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_steps(steps: Vec<Step>) -> Job {
        Job {
            id: JobId("j1".to_string()),
            url: "https://example.com/contact".to_string(),
            steps,
            config: None,
        }
    }

    #[test]
    fn step_wire_format_round_trips_lowercase_tags() {
        let json = r##"[
            {"action":"fill","selector":"input[name='name']","value":"Alec"},
            {"action":"click","selector":"button[type='submit']"},
            {"action":"wait","selector":"#success","timeout_ms":5000},
            {"action":"screenshot"},
            {"action":"pause"}
        ]"##;
        let steps: Vec<Step> = serde_json::from_str(json).unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].action_name(), "fill");
        assert_eq!(
            steps[2],
            Step::Wait {
                selector: Some("#success".to_string()),
                timeout_ms: Some(5000),
            }
        );
    }

    #[test]
    fn unknown_step_tag_parses_as_catch_all() {
        let step: Step = serde_json::from_str(r#"{"action":"hover"}"#).unwrap();
        assert_eq!(step, Step::Unknown);
    }

    #[test]
    fn validate_rejects_empty_step_list() {
        let job = job_with_steps(vec![]);
        assert_eq!(job.validate(), Err(ValidationError::NoSteps));
    }

    #[test]
    fn validate_rejects_out_of_range_bot_count() {
        let mut job = job_with_steps(vec![Step::Screenshot]);
        job.config = Some(JobConfig {
            multi_bot: Some(MultiBotConfig {
                enabled: true,
                count: 51,
                proxies: vec![],
                devices: vec![],
                delay_between_bots_ms: 0,
                randomize_order: false,
            }),
            ..Default::default()
        });
        assert_eq!(job.validate(), Err(ValidationError::BotCountOutOfRange(51)));
    }

    #[test]
    fn disabled_multi_bot_count_is_not_validated() {
        let mut job = job_with_steps(vec![Step::Screenshot]);
        job.config = Some(JobConfig {
            multi_bot: Some(MultiBotConfig {
                enabled: false,
                count: 0,
                proxies: vec![],
                devices: vec![],
                delay_between_bots_ms: 0,
                randomize_order: false,
            }),
            ..Default::default()
        });
        assert!(job.validate().is_ok());
    }

    #[test]
    fn device_presets_exist() {
        for name in ["desktop-chrome", "mobile-iphone", "mobile-android", "tablet-ipad"] {
            let device = DeviceConfig::preset(name).unwrap();
            assert!(device.user_agent.is_some());
            assert!(device.viewport.is_some());
        }
        assert!(DeviceConfig::preset("smart-fridge").is_none());
    }
}
