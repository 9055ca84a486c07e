use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use url::Url;

mod dotenv_utils;

use dotenv_utils::load_dotenv_map;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const ENV_API_URL: &str = "RENDER_BRIDGE_API_URL";
pub const ENV_API_KEY: &str = "RENDER_BRIDGE_API_KEY";
pub const ENV_TIMEOUT_MINUTES: &str = "RENDER_BRIDGE_TIMEOUT_MINUTES";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "RENDER_BRIDGE_REQUEST_TIMEOUT_SECS";

const DEFAULT_SETTINGS_REL_PATH: &str = "config/render-bridge.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCredentials {
    pub api_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub credentials: RenderCredentials,
    pub timeout_minutes: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            credentials: RenderCredentials {
                api_url: String::from(DEFAULT_API_URL),
                api_key: None,
            },
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl RenderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn apply(&mut self, overlay: &RenderSettingsOverlay) {
        if let Some(api_url) = overlay.api_url.as_ref() {
            self.credentials.api_url = api_url.clone();
        }
        if let Some(api_key) = overlay.api_key.as_ref() {
            self.credentials.api_key = Some(api_key.clone());
        }
        if let Some(minutes) = overlay.timeout_minutes {
            self.timeout_minutes = minutes;
        }
        if let Some(secs) = overlay.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = overlay.connect_timeout_secs {
            self.connect_timeout_secs = secs;
        }
    }

    pub fn validated_api_url(&self) -> Result<Url, SettingsError> {
        validate_api_url(self.credentials.api_url.as_str())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.validated_api_url()?;
        if self.timeout_minutes == 0 {
            return Err(SettingsError::MustBePositive {
                field: String::from("timeout_minutes"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderSettingsOverlay {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_minutes: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read render settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse render settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("render settings root must be a table")]
    RootMustBeTable,
    #[error("render settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
    #[error("environment value {key}='{value}' is not a valid number")]
    InvalidEnvNumber { key: String, value: String },
    #[error("invalid render server url '{url}': {message}")]
    InvalidApiUrl { url: String, message: String },
    #[error("render settings field '{field}' must be greater than zero")]
    MustBePositive { field: String },
}

/// Loads settings with precedence: defaults, settings file, `.env` in the app
/// root, then the process environment.
pub fn load_render_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<RenderSettings, SettingsError> {
    let file_overlay = load_settings_file(app_root, explicit_path)?;
    let dotenv = load_dotenv_map(app_root).unwrap_or_default();
    let dotenv_overlay = env_overlay(|key| dotenv.get(key).cloned())?;
    let process_overlay = env_overlay(|key| std::env::var(key).ok())?;

    let mut settings = RenderSettings::default();
    settings.apply(&file_overlay);
    settings.apply(&dotenv_overlay);
    settings.apply(&process_overlay);
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings_file(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<RenderSettingsOverlay, SettingsError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
    {
        if !path.exists() {
            return Err(SettingsError::ReadFile {
                path: path.display().to_string(),
                message: String::from("file does not exist"),
            });
        }
        return load_overlay_from_toml_path(path.as_path());
    }

    let default_path = app_root.join(DEFAULT_SETTINGS_REL_PATH);
    if !default_path.exists() {
        return Ok(RenderSettingsOverlay::default());
    }
    load_overlay_from_toml_path(default_path.as_path())
}

pub fn env_overlay<F>(lookup: F) -> Result<RenderSettingsOverlay, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Ok(RenderSettingsOverlay {
        api_url: non_empty(ENV_API_URL),
        api_key: non_empty(ENV_API_KEY),
        timeout_minutes: non_empty(ENV_TIMEOUT_MINUTES)
            .map(|v| parse_env_number(ENV_TIMEOUT_MINUTES, v.as_str()))
            .transpose()?,
        request_timeout_secs: non_empty(ENV_REQUEST_TIMEOUT_SECS)
            .map(|v| parse_env_number(ENV_REQUEST_TIMEOUT_SECS, v.as_str()))
            .transpose()?,
        connect_timeout_secs: None,
    })
}

pub fn parse_render_settings_overlay(value: &Value) -> Result<RenderSettingsOverlay, SettingsError> {
    let root = value.as_object().ok_or(SettingsError::RootMustBeTable)?;
    let render_value = root.get("render").unwrap_or(value);
    let render = render_value
        .as_object()
        .ok_or(SettingsError::RootMustBeTable)?;

    let mut out = RenderSettingsOverlay::default();
    if let Some(v) = render.get("api_url") {
        out.api_url = Some(parse_string(v, "api_url")?);
    }
    if let Some(v) = render.get("api_key") {
        out.api_key = Some(parse_string(v, "api_key")?);
    }
    if let Some(v) = render.get("timeout_minutes") {
        out.timeout_minutes = Some(parse_u32(v, "timeout_minutes")?);
    }
    if let Some(v) = render.get("request_timeout_secs") {
        out.request_timeout_secs = Some(parse_u64(v, "request_timeout_secs")?);
    }
    if let Some(v) = render.get("connect_timeout_secs") {
        out.connect_timeout_secs = Some(parse_u64(v, "connect_timeout_secs")?);
    }
    Ok(out)
}

pub fn validate_api_url(raw: &str) -> Result<Url, SettingsError> {
    let invalid = |message: String| SettingsError::InvalidApiUrl {
        url: raw.to_string(),
        message,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(url)
}

fn load_overlay_from_toml_path(path: &Path) -> Result<RenderSettingsOverlay, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
        SettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    let json_value = serde_json::to_value(parsed).map_err(|error| SettingsError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_render_settings_overlay(&json_value)
}

fn parse_env_number<T>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
{
    value.parse::<T>().map_err(|_| SettingsError::InvalidEnvNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsError> {
    let parsed = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })?;
    if parsed.is_empty() {
        return Err(SettingsError::InvalidFieldType {
            field: field.to_string(),
        });
    }
    Ok(parsed.to_string())
}

fn parse_u64(value: &Value, field: &str) -> Result<u64, SettingsError> {
    value
        .as_u64()
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_u32(value: &Value, field: &str) -> Result<u32, SettingsError> {
    parse_u64(value, field).and_then(|v| {
        u32::try_from(v).map_err(|_| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
    })
}
