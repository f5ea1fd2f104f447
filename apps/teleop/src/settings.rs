use std::{fs, path::Path, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use client_core::{QueueOptions, ReconnectPolicy};
use serde::Deserialize;
use shared::protocol::DEFAULT_SUBPROTOCOL;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rover_url: String,
    pub subprotocol: String,
    pub tick_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// 0 waits for the handshake forever.
    pub connect_timeout_ms: u64,
    /// 0 waits for acknowledgments forever.
    pub ack_timeout_ms: u64,
    pub halt_on_reconnect: bool,
    pub auto_clear_errors: bool,
    pub halt_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rover_url: "ws://127.0.0.1:8765/ws".into(),
            subprotocol: DEFAULT_SUBPROTOCOL.into(),
            tick_ms: 16,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 8_000,
            connect_timeout_ms: 10_000,
            ack_timeout_ms: 2_000,
            halt_on_reconnect: true,
            auto_clear_errors: true,
            halt_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    rover_url: Option<String>,
    subprotocol: Option<String>,
    tick_ms: Option<u64>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    ack_timeout_ms: Option<u64>,
    halt_on_reconnect: Option<bool>,
    auto_clear_errors: Option<bool>,
    halt_timeout_ms: Option<u64>,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.rover_url)
            .with_context(|| format!("invalid rover url: {}", self.rover_url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("rover url must use ws or wss, got {}", url.scheme());
        }
        if self.subprotocol.trim().is_empty() {
            bail!("subprotocol must not be empty");
        }
        if self.tick_ms == 0 {
            bail!("tick_ms must be positive");
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_initial_ms > self.reconnect_max_ms {
            bail!(
                "reconnect backoff must satisfy 0 < initial ({}) <= max ({})",
                self.reconnect_initial_ms,
                self.reconnect_max_ms
            );
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            reconnect: ReconnectPolicy {
                initial_backoff: Duration::from_millis(self.reconnect_initial_ms),
                max_backoff: Duration::from_millis(self.reconnect_max_ms),
                connect_timeout: (self.connect_timeout_ms > 0)
                    .then(|| Duration::from_millis(self.connect_timeout_ms)),
                ack_timeout: (self.ack_timeout_ms > 0)
                    .then(|| Duration::from_millis(self.ack_timeout_ms)),
                halt_on_reconnect: self.halt_on_reconnect,
                auto_clear_errors: self.auto_clear_errors,
            },
            halt_timeout: Duration::from_millis(self.halt_timeout_ms),
        }
    }
}

pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    load_settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file, then `ROVER_*` and `APP__*` variables.
pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        let file_cfg: FileSettings = toml::from_str(raw).context("failed to parse settings file")?;
        if let Some(v) = file_cfg.rover_url {
            settings.rover_url = v;
        }
        if let Some(v) = file_cfg.subprotocol {
            settings.subprotocol = v;
        }
        if let Some(v) = file_cfg.tick_ms {
            settings.tick_ms = v;
        }
        if let Some(v) = file_cfg.reconnect_initial_ms {
            settings.reconnect_initial_ms = v;
        }
        if let Some(v) = file_cfg.reconnect_max_ms {
            settings.reconnect_max_ms = v;
        }
        if let Some(v) = file_cfg.connect_timeout_ms {
            settings.connect_timeout_ms = v;
        }
        if let Some(v) = file_cfg.ack_timeout_ms {
            settings.ack_timeout_ms = v;
        }
        if let Some(v) = file_cfg.halt_on_reconnect {
            settings.halt_on_reconnect = v;
        }
        if let Some(v) = file_cfg.auto_clear_errors {
            settings.auto_clear_errors = v;
        }
        if let Some(v) = file_cfg.halt_timeout_ms {
            settings.halt_timeout_ms = v;
        }
    }

    for key in ["ROVER_URL", "APP__ROVER_URL"] {
        if let Some(v) = env(key) {
            settings.rover_url = v;
        }
    }
    if let Some(v) = env("ROVER_SUBPROTOCOL") {
        settings.subprotocol = v;
    }
    override_from(&env, "ROVER_TICK_MS", &mut settings.tick_ms)?;
    override_from(&env, "ROVER_RECONNECT_INITIAL_MS", &mut settings.reconnect_initial_ms)?;
    override_from(&env, "ROVER_RECONNECT_MAX_MS", &mut settings.reconnect_max_ms)?;
    override_from(&env, "ROVER_CONNECT_TIMEOUT_MS", &mut settings.connect_timeout_ms)?;
    override_from(&env, "ROVER_ACK_TIMEOUT_MS", &mut settings.ack_timeout_ms)?;
    override_from(&env, "ROVER_HALT_ON_RECONNECT", &mut settings.halt_on_reconnect)?;
    override_from(&env, "ROVER_AUTO_CLEAR_ERRORS", &mut settings.auto_clear_errors)?;
    override_from(&env, "ROVER_HALT_TIMEOUT_MS", &mut settings.halt_timeout_ms)?;

    Ok(settings)
}

fn override_from<T>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &mut T,
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = env(key) {
        *field = raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}"))?;
    }
    Ok(())
}
