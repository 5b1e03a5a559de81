use crate::domain::models::DurationConfig;
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const TIMER_JSON: &str = "timer.json";
const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_GATEWAY_TIMEOUT_SECONDS: u64 = 10;
const GATEWAY_URL_ENV: &str = "FOCUS_GATEWAY_URL";
const GATEWAY_TOKEN_ENV: &str = "FOCUS_GATEWAY_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout_seconds: u64,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        TIMER_JSON,
        serde_json::json!({
            "schema": 1,
            "focusMinutes": 25,
            "shortBreakMinutes": 5,
            "longBreakMinutes": 15,
            "longBreakEvery": 4,
            "soundEnabled": true,
            "gateway": {
                "baseUrl": DEFAULT_GATEWAY_URL,
                "apiToken": null,
                "timeoutSeconds": DEFAULT_GATEWAY_TIMEOUT_SECONDS
            }
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_duration_config(config_dir: &Path) -> Result<DurationConfig, InfraError> {
    let timer = read_config(&config_dir.join(TIMER_JSON))?;
    serde_json::from_value(timer).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid timer settings in {TIMER_JSON}: {error}"))
    })
}

pub fn save_duration_config(config_dir: &Path, config: &DurationConfig) -> Result<(), InfraError> {
    let path = config_dir.join(TIMER_JSON);
    let mut timer = read_config(&path)?;
    let object = timer.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;

    let serde_json::Value::Object(settings) = serde_json::to_value(config)? else {
        return Err(InfraError::InvalidConfig(
            "timer settings must serialize to an object".to_string(),
        ));
    };
    for (key, value) in settings {
        if value.is_null() {
            object.remove(&key);
        } else {
            object.insert(key, value);
        }
    }

    let formatted = serde_json::to_string_pretty(&timer)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_gateway_config(config_dir: &Path) -> Result<GatewayConfig, InfraError> {
    load_gateway_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_gateway_config_with_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<GatewayConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let timer = read_config(&config_dir.join(TIMER_JSON))?;
    let gateway = timer.get("gateway");

    let base_url = lookup(GATEWAY_URL_ENV)
        .or_else(|| {
            gateway
                .and_then(|value| value.get("baseUrl"))
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned)
        })
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

    let api_token = lookup(GATEWAY_TOKEN_ENV)
        .or_else(|| {
            gateway
                .and_then(|value| value.get("apiToken"))
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned)
        })
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let timeout_seconds = gateway
        .and_then(|value| value.get("timeoutSeconds"))
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_GATEWAY_TIMEOUT_SECONDS);

    Ok(GatewayConfig {
        base_url,
        api_token,
        timeout_seconds,
    })
}
