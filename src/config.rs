use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::overlay::BoxPolicy;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 0;
const MAX_RETRIES_LIMIT: u32 = 5;
const DEFAULT_STROKE_WIDTH: u32 = 2;
const MAX_STROKE_WIDTH: u32 = 32;
const DEFAULT_BOX_COLOR: [u8; 3] = [255, 0, 0];
const DEFAULT_BACKGROUND: [u8; 3] = [0, 0, 0];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    model: Option<ModelConfigFile>,
    overlay: Option<OverlayStyleFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    endpoint: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayStyleFile {
    clamp: Option<bool>,
    stroke_width: Option<u32>,
    color: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RenderConfigFile {
    background: Option<[u8; 3]>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub model: ModelSettings,
    pub overlay: OverlaySettings,
    pub render: RenderSettings,
}

#[derive(Clone)]
pub struct ModelSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl std::fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSettings")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub policy: BoxPolicy,
    pub stroke_width: u32,
    pub color: [u8; 3],
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub background: [u8; 3],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            overlay: OverlaySettings {
                policy: BoxPolicy::Raw,
                stroke_width: DEFAULT_STROKE_WIDTH,
                color: DEFAULT_BOX_COLOR,
            },
            render: RenderSettings {
                background: DEFAULT_BACKGROUND,
            },
        }
    }
}

impl OverlayConfig {
    /// Load from the file named by `SPATIAL_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SPATIAL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit TOML file (or defaults), then apply environment
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Self {
        let defaults = Self::default();
        let model = file.model.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let render = file.render.unwrap_or_default();
        Self {
            model: ModelSettings {
                endpoint: model.endpoint.unwrap_or(defaults.model.endpoint),
                model: model.model.unwrap_or(defaults.model.model),
                api_key: model.api_key.or(defaults.model.api_key),
                timeout: model
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.model.timeout),
                max_retries: model.max_retries.unwrap_or(defaults.model.max_retries),
            },
            overlay: OverlaySettings {
                policy: match overlay.clamp {
                    Some(true) => BoxPolicy::Clamp,
                    Some(false) => BoxPolicy::Raw,
                    None => defaults.overlay.policy,
                },
                stroke_width: overlay
                    .stroke_width
                    .unwrap_or(defaults.overlay.stroke_width),
                color: overlay.color.unwrap_or(defaults.overlay.color),
            },
            render: RenderSettings {
                background: render.background.unwrap_or(defaults.render.background),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.model.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(endpoint) = std::env::var("SPATIAL_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.model.endpoint = endpoint;
            }
        }
        if let Ok(model) = std::env::var("SPATIAL_MODEL") {
            if !model.trim().is_empty() {
                self.model.model = model;
            }
        }
        if let Ok(timeout) = std::env::var("SPATIAL_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SPATIAL_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.model.timeout = Duration::from_secs(seconds);
        }
        if let Ok(retries) = std::env::var("SPATIAL_MAX_RETRIES") {
            self.model.max_retries = retries
                .trim()
                .parse()
                .map_err(|_| anyhow!("SPATIAL_MAX_RETRIES must be a non-negative integer"))?;
        }
        if let Ok(clamp) = std::env::var("SPATIAL_CLAMP_BOXES") {
            self.overlay.policy = if parse_flag("SPATIAL_CLAMP_BOXES", &clamp)? {
                BoxPolicy::Clamp
            } else {
                BoxPolicy::Raw
            };
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let endpoint = Url::parse(&self.model.endpoint)
            .map_err(|e| anyhow!("invalid model endpoint '{}': {}", self.model.endpoint, e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "model endpoint must be http(s), got '{}'",
                endpoint.scheme()
            ));
        }
        self.model.model = self.model.model.trim().to_string();
        if self.model.model.is_empty() {
            return Err(anyhow!("model name must not be empty"));
        }
        if self.model.timeout.as_secs() == 0 {
            return Err(anyhow!("model timeout must be greater than zero"));
        }
        if self.model.max_retries > MAX_RETRIES_LIMIT {
            return Err(anyhow!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT,
                self.model.max_retries
            ));
        }
        if !(1..=MAX_STROKE_WIDTH).contains(&self.overlay.stroke_width) {
            return Err(anyhow!(
                "stroke_width must be between 1 and {}, got {}",
                MAX_STROKE_WIDTH,
                self.overlay.stroke_width
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be true or false, got '{}'", name, value)),
    }
}
