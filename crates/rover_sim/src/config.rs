use std::fs;

use anyhow::Context;
use serde::Deserialize;
use shared::protocol::DEFAULT_SUBPROTOCOL;

pub const SETTINGS_FILE: &str = "rover_sim.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub subprotocol: String,
    /// Telemetry period; 0 disables the stream.
    pub telemetry_ms: u64,
    /// Corrupt every Nth acknowledgment; 0 never.
    pub corrupt_every: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".into(),
            subprotocol: DEFAULT_SUBPROTOCOL.into(),
            telemetry_ms: 200,
            corrupt_every: 0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    subprotocol: Option<String>,
    telemetry_ms: Option<u64>,
    corrupt_every: Option<u64>,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file, then `ROVER_SIM_*` and `APP__*` variables.
pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        let file_cfg: FileSettings =
            toml::from_str(raw).with_context(|| format!("failed to parse {SETTINGS_FILE}"))?;
        if let Some(v) = file_cfg.bind_addr {
            settings.bind_addr = v;
        }
        if let Some(v) = file_cfg.subprotocol {
            settings.subprotocol = v;
        }
        if let Some(v) = file_cfg.telemetry_ms {
            settings.telemetry_ms = v;
        }
        if let Some(v) = file_cfg.corrupt_every {
            settings.corrupt_every = v;
        }
    }

    for key in ["ROVER_SIM_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = env(key) {
            settings.bind_addr = v;
        }
    }
    if let Some(v) = env("ROVER_SIM_SUBPROTOCOL") {
        settings.subprotocol = v;
    }
    if let Some(v) = env("ROVER_SIM_TELEMETRY_MS") {
        settings.telemetry_ms = v
            .parse()
            .with_context(|| format!("ROVER_SIM_TELEMETRY_MS is not a number: {v}"))?;
    }
    if let Some(v) = env("ROVER_SIM_CORRUPT_EVERY") {
        settings.corrupt_every = v
            .parse()
            .with_context(|| format!("ROVER_SIM_CORRUPT_EVERY is not a number: {v}"))?;
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let settings = load_settings_from(None, env_from(&[])).expect("settings");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.subprotocol, "arduino");
    }

    #[test]
    fn env_overrides_file() {
        let file = r#"
bind_addr = "0.0.0.0:9000"
telemetry_ms = 50
corrupt_every = 3
"#;
        let settings = load_settings_from(
            Some(file),
            env_from(&[("APP__BIND_ADDR", "127.0.0.1:9100"), ("ROVER_SIM_CORRUPT_EVERY", "0")]),
        )
        .expect("settings");

        assert_eq!(settings.bind_addr, "127.0.0.1:9100");
        assert_eq!(settings.telemetry_ms, 50);
        assert_eq!(settings.corrupt_every, 0);
    }

    #[test]
    fn rejects_non_numeric_env() {
        let err = load_settings_from(None, env_from(&[("ROVER_SIM_TELEMETRY_MS", "fast")]))
            .expect_err("bad number");
        assert!(err.to_string().contains("ROVER_SIM_TELEMETRY_MS"));
    }

    #[test]
    fn rejects_malformed_file() {
        assert!(load_settings_from(Some("telemetry_ms = \"soon\""), env_from(&[])).is_err());
    }
}
