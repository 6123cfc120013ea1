//! Gateway configuration
//!
//! Loaded in layers with `figment`: built-in defaults, then an optional file
//! (TOML, YAML or JSON by extension), then `GATEWAY_` prefixed environment
//! variables. Nested keys use a double underscore, e.g.
//! `GATEWAY_SERIAL__BAUD_RATE=19200`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{GatewayError, GatewayResult};
use crate::integrity::DEFAULT_INTEGRITY_WINDOW;
use crate::transport::simulated::AlarmInjection;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "GATEWAY_";

/// Which backend the facade brings up on `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Real hardware is mandatory; connection failures propagate
    Real,
    /// Always use the simulator
    Simulated,
    /// Try real hardware, fall back to the simulator
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line parameters for one port session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    /// Per-transaction response timeout
    pub response_timeout_ms: u64,
    /// Bus turnaround observed before every request
    pub turnaround_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: constants::DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            response_timeout_ms: constants::DEFAULT_RESPONSE_TIMEOUT_MS,
            turnaround_ms: constants::DEFAULT_TRANSACTION_LATENCY_MS,
        }
    }
}

impl SerialSettings {
    pub fn for_port<S: Into<String>>(port: S) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[inline]
    pub fn turnaround(&self) -> Duration {
        Duration::from_millis(self.turnaround_ms)
    }

    pub fn with_turnaround_ms(mut self, turnaround_ms: u64) -> Self {
        self.turnaround_ms = turnaround_ms;
        self
    }

    pub fn with_response_timeout_ms(mut self, response_timeout_ms: u64) -> Self {
        self.response_timeout_ms = response_timeout_ms;
        self
    }

    pub fn tokio_data_bits(&self) -> GatewayResult<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(GatewayError::configuration(format!(
                "Invalid data bits: {} (must be 5-8)",
                other
            ))),
        }
    }

    pub fn tokio_stop_bits(&self) -> GatewayResult<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(GatewayError::configuration(format!(
                "Invalid stop bits: {} (must be 1 or 2)",
                other
            ))),
        }
    }

    pub fn tokio_parity(&self) -> tokio_serial::Parity {
        match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.port.trim().is_empty() {
            return Err(GatewayError::configuration("Serial port path is empty"));
        }
        if self.baud_rate == 0 {
            return Err(GatewayError::configuration("Baud rate must be positive"));
        }
        if self.response_timeout_ms == 0 {
            return Err(GatewayError::configuration(
                "Response timeout must be positive",
            ));
        }
        self.tokio_data_bits()?;
        self.tokio_stop_bits()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay_ms: constants::DEFAULT_RETRY_INITIAL_DELAY_MS,
            max_delay_ms: constants::DEFAULT_RETRY_MAX_DELAY_MS,
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Simulator tuning and initial fault toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub latency_ms: u64,
    /// Fine-tuning offset added to generated setpoints (degrees)
    pub temperature_offset: f64,
    /// Seed for reproducible values; random when unset
    pub seed: Option<u64>,
    pub communication_failure: bool,
    pub alarm: Option<AlarmInjection>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            latency_ms: constants::DEFAULT_TRANSACTION_LATENCY_MS,
            temperature_offset: 0.0,
            seed: None,
            communication_failure: false,
            alarm: None,
        }
    }
}

impl SimulationSettings {
    #[inline]
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub mode: BackendMode,
    pub serial: SerialSettings,
    pub retry: RetrySettings,
    pub simulation: SimulationSettings,
    /// Samples kept per address by the integrity monitor
    pub integrity_window: usize,
    /// Restrict the reverse index to one site
    pub site: Option<String>,
    /// Field map file (TOML, YAML or JSON)
    pub field_map: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            serial: SerialSettings::default(),
            retry: RetrySettings::default(),
            simulation: SimulationSettings::default(),
            integrity_window: DEFAULT_INTEGRITY_WINDOW,
            site: None,
            field_map: None,
        }
    }
}

impl GatewayConfig {
    /// Load defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> GatewayResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(file_figment(path)?);
        }
        let config: GatewayConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a single file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let config: GatewayConfig = Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(file_figment(path.as_ref())?)
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        self.serial.validate()?;
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(GatewayError::configuration(
                "Retry initial delay exceeds max delay",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(GatewayError::configuration(
                "Retry multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Builder-style overrides
    pub fn with_mode(mut self, mode: BackendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_serial(mut self, serial: SerialSettings) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_simulation(mut self, simulation: SimulationSettings) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_site<S: Into<String>>(mut self, site: S) -> Self {
        self.site = Some(site.into());
        self
    }
}

/// File provider chosen by extension.
pub(crate) fn file_figment(path: &Path) -> GatewayResult<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            GatewayError::configuration(format!(
                "Config file must have an extension: {}",
                path.display()
            ))
        })?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file_exact(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file_exact(path))),
        "json" => Ok(Figment::new().merge(Json::file_exact(path))),
        other => Err(GatewayError::configuration(format!(
            "Unsupported config file format: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::DeviceType;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.mode, BackendMode::Auto);
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.simulation.latency(), Duration::from_millis(70));
        assert_eq!(config.serial.turnaround(), config.simulation.latency());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
mode = "simulated"
site = "north"

[serial]
port = "/dev/ttyS1"
parity = "even"

[simulation]
seed = 42
temperature_offset = 0.5

[simulation.alarm]
device_type = "cooler"
value = 9
"#,
        )
        .unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.mode, BackendMode::Simulated);
        assert_eq!(config.site.as_deref(), Some("north"));
        assert_eq!(config.serial.port, "/dev/ttyS1");
        assert_eq!(config.serial.parity, Parity::Even);
        // untouched keys keep their defaults
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.simulation.seed, Some(42));
        let alarm = config.simulation.alarm.unwrap();
        assert_eq!(alarm.device_type, DeviceType::Cooler);
        assert_eq!(alarm.value, 9);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = GatewayConfig::from_file("gateway.ini").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_serial_settings() {
        let mut serial = SerialSettings::default();
        serial.data_bits = 9;
        assert!(serial.validate().is_err());

        let mut serial = SerialSettings::default();
        serial.stop_bits = 3;
        assert!(serial.validate().is_err());

        let serial = SerialSettings::for_port("");
        assert!(serial.validate().is_err());
    }
}
