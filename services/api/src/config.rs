use crate::ws::{bridge::BridgeSettings, link::Keepalive};
use phonebridge_core::realtime::SessionConfig;
use secrecy::SecretString;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::Level;

const DEFAULT_INSTRUCTIONS: &str = "Você é um atendente virtual educado e objetivo. \
Fale em português do Brasil. \
Se algo estiver ambíguo, faça uma pergunta curta para confirmar.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub media_path: String,
    pub queue_capacity: usize,
    pub close_grace: Duration,
    /// Zero turns keepalive pings off.
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_message_size: usize,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host: IpAddr = parse_var("HOST", "0.0.0.0")?;
        let port: u16 = parse_var("PORT", "8000")?;
        let bind_address = SocketAddr::new(host, port);

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url = var_or("REALTIME_URL", "wss://api.openai.com/v1/realtime");
        let model = var_or("MODEL", "gpt-realtime");
        let voice = var_or("VOICE", "marin");
        let instructions = var_or("AGENT_INSTRUCTIONS", DEFAULT_INSTRUCTIONS);

        let media_path = var_or("MEDIA_STREAM_PATH", "/twilio");
        if !media_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "MEDIA_STREAM_PATH".to_string(),
                format!("'{}' must start with '/'", media_path),
            ));
        }

        let queue_capacity: usize = parse_var("LINK_QUEUE_CAPACITY", "256")?;
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "LINK_QUEUE_CAPACITY".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let close_grace = Duration::from_millis(parse_var("CLOSE_GRACE_MS", "2000")?);
        let ping_interval = Duration::from_millis(parse_var("PING_INTERVAL_MS", "20000")?);
        let ping_timeout = Duration::from_millis(parse_var("PING_TIMEOUT_MS", "20000")?);
        if !ping_interval.is_zero() && ping_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PING_TIMEOUT_MS".to_string(),
                "must be greater than zero while pings are enabled".to_string(),
            ));
        }
        let max_message_size: usize = parse_var("MAX_MESSAGE_SIZE", "8388608")?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_url,
            model,
            voice,
            instructions,
            media_path,
            queue_capacity,
            close_grace,
            ping_interval,
            ping_timeout,
            max_message_size,
            log_level,
        })
    }

    /// The settings every call's bridge runs with.
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            session: SessionConfig::telephony(&self.model, &self.voice, &self.instructions),
            queue_capacity: self.queue_capacity,
            close_grace: self.close_grace,
            keepalive: self.keepalive(),
        }
    }

    fn keepalive(&self) -> Option<Keepalive> {
        (!self.ping_interval.is_zero()).then_some(Keepalive {
            interval: self.ping_interval,
            timeout: self.ping_timeout,
        })
    }
}
