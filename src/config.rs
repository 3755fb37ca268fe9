//! Configuration system using Figment.
//!
//! Settings are layered, lowest to highest precedence:
//! 1. Built-in defaults (a simulated mutual-inductance rig)
//! 2. A TOML file (default: `config/galileo.toml`, override with `--config`)
//! 3. Environment variables prefixed with `GALILEO_`, nested keys separated by `__`
//!
//! ```text
//! GALILEO_APPLICATION__LOG_LEVEL=debug
//! GALILEO_MEASUREMENT__INTERVAL=5ms
//! GALILEO_STORAGE__DIRECTORY=/data/run42
//! ```
//!
//! Durations are written in humantime form (`250us`, `50ms`, `3s`).

use crate::error::{AppResult, GalileoError};
use crate::protocol::{AxisPair, PlotSetup};
use crate::sample::{Schema, ValueFormat, VariableSpec};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/galileo.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GALILEO_";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Acquisition loop settings
    pub measurement: MeasurementSettings,
    /// Live plot settings
    pub plot: PlotSettings,
    /// Data file settings
    pub storage: StorageSettings,
    /// Sample schema, in CSV column order
    pub variables: Vec<VariableSpec>,
    /// Instruments making up the rig
    pub instruments: InstrumentSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name, used in the prompt banner
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "Galileo".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Acquisition loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementSettings {
    /// Experiment title, shown at start and written to the notes file
    pub title: String,
    /// Sleep between ticks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// End the run after this many ticks (perpetual when absent)
    pub max_ticks: Option<u64>,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            title: "MI (simulated)".to_string(),
            interval: Duration::from_millis(100),
            max_ticks: None,
        }
    }
}

/// Where the plot worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotWorkerMode {
    /// Child process of this binary (`galileo plot-worker`), with a window
    /// when built with the `gui` feature
    Process,
    /// Headless task inside the coordinator's runtime
    InProcess,
}

/// Live plot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    /// Launch the plot worker at all
    pub enabled: bool,
    /// Where the worker runs
    pub worker: PlotWorkerMode,
    /// Subplot grid: rows of `[x, y]` variable pairs
    pub subplots: Vec<Vec<[String; 2]>>,
    /// Redraw cadence while a window is open
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Cadence at which the worker drains commands and re-requests data
    #[serde(with = "humantime_serde")]
    pub listen_interval: Duration,
    /// How long `quit` waits for the worker before killing it
    #[serde(with = "humantime_serde")]
    pub quit_timeout: Duration,
    /// How long control commands wait for their acknowledgement
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// How long to wait for the first data request and for a window to open
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// Hard ceiling on buffered points per subplot
    pub max_points: usize,
    /// Initial buffer capacity (doubles up to `max_points`)
    pub initial_points: usize,
    /// Keep every k-th point when the ceiling is hit
    pub downsample_ratio: usize,
    /// Fractional margin added around the data when autoscaling
    pub overrange: f64,
}

impl Default for PlotSettings {
    fn default() -> Self {
        let pair = |x: &str, y: &str| [x.to_string(), y.to_string()];
        Self {
            enabled: true,
            worker: PlotWorkerMode::Process,
            subplots: vec![
                vec![pair("T", "X"), pair("T", "Y")],
                vec![pair("t", "T"), pair("t", "H")],
            ],
            refresh_interval: Duration::from_millis(500),
            listen_interval: Duration::from_millis(50),
            quit_timeout: Duration::from_secs(3),
            ack_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(10),
            max_points: 1_000_000,
            initial_points: 128,
            downsample_ratio: 10,
            overrange: 0.05,
        }
    }
}

impl PlotSettings {
    /// Builds the worker's setup message, resolving axis titles from `schema`.
    pub fn setup(&self, schema: &Schema) -> AppResult<PlotSetup> {
        let mut rows = Vec::with_capacity(self.subplots.len());
        for row in &self.subplots {
            let mut cells = Vec::with_capacity(row.len());
            for [x, y] in row {
                let x_spec = schema.get(x).ok_or_else(|| {
                    GalileoError::Configuration(format!("Subplot references undeclared variable '{x}'"))
                })?;
                let y_spec = schema.get(y).ok_or_else(|| {
                    GalileoError::Configuration(format!("Subplot references undeclared variable '{y}'"))
                })?;
                cells.push(AxisPair {
                    x: x.clone(),
                    y: y.clone(),
                    x_title: x_spec.display_title().to_string(),
                    y_title: y_spec.display_title().to_string(),
                });
            }
            rows.push(cells);
        }
        Ok(PlotSetup {
            subplots: rows,
            refresh_interval: self.refresh_interval,
            listen_interval: self.listen_interval,
            max_points: self.max_points,
            initial_points: self.initial_points,
            downsample_ratio: self.downsample_ratio,
            overrange: self.overrange,
        })
    }
}

/// Where and how samples are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One CSV file per run plus a notes file
    Csv,
    /// Discard samples (dry runs)
    None,
}

/// Data file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Storage backend
    pub backend: StorageBackend,
    /// Output directory, created if missing
    pub directory: PathBuf,
    /// File name stem; the run start time is prepended
    pub file_stem: String,
    /// Flush the CSV file when this much time has passed since the last flush
    #[serde(with = "humantime_serde")]
    pub save_interval: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Csv,
            directory: PathBuf::from("data"),
            file_stem: "logfile".to_string(),
            save_interval: Duration::from_secs(10),
        }
    }
}

/// Serial link to an instrument, optionally through a GPIB bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSettings {
    /// Serial port (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout
    #[serde(default = "default_transport_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// GPIB address behind a Prologix-style bridge (`++addr N`)
    #[serde(default)]
    pub gpib_address: Option<u8>,
    /// Line terminator appended to every command
    #[serde(default = "default_terminator")]
    pub terminator: String,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_transport_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_terminator() -> String {
    "\n".to_string()
}

/// Thermometer selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThermometerSettings {
    /// Simulated, stepping temperature
    Step {
        /// First reading
        initial: f64,
        /// Added on every read
        step: f64,
    },
    /// Simulated, constant temperature plus uniform noise
    Noisy {
        /// Centre temperature in K
        base: f64,
        /// Half-width of the noise band in K
        amplitude: f64,
        /// RNG seed for reproducible runs
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Lakeshore 332 temperature controller input
    Lakeshore332 {
        /// Bus link
        transport: TransportSettings,
        /// Input channel ("A" or "B")
        #[serde(default = "default_lakeshore_channel")]
        channel: String,
        /// Record NaN instead of ending the run on a bus failure
        #[serde(default)]
        nan_on_error: bool,
    },
}

fn default_lakeshore_channel() -> String {
    "A".to_string()
}

/// Lock-in amplifier selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockInSettings {
    /// Simulated, X = sin(phase), Y = cos(phase)
    SinCos {
        /// Phase advance per read
        omega: f64,
    },
    /// Simulated, every field returns the same value
    Const {
        /// Value returned for every field
        reading: f64,
    },
    /// Stanford Research SR830
    Sr830 {
        /// Bus link
        transport: TransportSettings,
        /// `[low, high]` fractions of full scale that trigger a sensitivity change
        #[serde(default)]
        auto_sensitivity: Option<[f64; 2]>,
        /// Record NaN instead of ending the run on a failed read
        #[serde(default)]
        nan_on_error: bool,
    },
    /// Stanford Research SR844
    Sr844 {
        /// Bus link
        transport: TransportSettings,
        /// `[low, high]` fractions of full scale that trigger a sensitivity change
        #[serde(default)]
        auto_sensitivity: Option<[f64; 2]>,
        /// Record NaN instead of ending the run on a failed read
        #[serde(default)]
        nan_on_error: bool,
    },
}

/// Magnet power supply selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MagnetSettings {
    /// Simulated, stepping field
    Step {
        /// First reading in T
        initial: f64,
        /// Added on every read
        step: f64,
    },
    /// Oxford Instruments IPS120-10
    Ips120 {
        /// Bus link
        transport: TransportSettings,
        /// Record NaN instead of ending the run on a failed read
        #[serde(default)]
        nan_on_error: bool,
    },
}

/// Instruments making up the rig. Any of them may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Thermometer
    pub thermometer: Option<ThermometerSettings>,
    /// Lock-in amplifier
    pub lockin: Option<LockInSettings>,
    /// Magnet power supply
    pub magnet: Option<MagnetSettings>,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            thermometer: Some(ThermometerSettings::Step {
                initial: 300.0,
                step: -0.01,
            }),
            lockin: Some(LockInSettings::SinCos { omega: 0.0003 }),
            magnet: Some(MagnetSettings::Step {
                initial: 0.0,
                step: 1.0e-3,
            }),
        }
    }
}

/// The mutual-inductance column set.
pub fn default_variables() -> Vec<VariableSpec> {
    let var = |name: &str, title: &str, format: ValueFormat| {
        VariableSpec::new(name).titled(title).formatted(format)
    };
    vec![
        var("n", "n", ValueFormat::Integer),
        var("t", "t (s)", ValueFormat::Fixed(3)),
        var("T", "T (K)", ValueFormat::Scientific(6)),
        var("H", "H (T)", ValueFormat::Scientific(6)),
        var("X", "X (V)", ValueFormat::Scientific(6)),
        var("Y", "Y (V)", ValueFormat::Scientific(6)),
    ]
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] (if present) and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string (defaults fill the gaps), then validate.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let settings: Self = Self::figment().merge(Toml::string(toml)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment() -> Figment {
        let mut defaults = Settings::default();
        defaults.variables = default_variables();
        Figment::from(Serialized::defaults(defaults))
    }

    /// Builds the sample schema from `variables`.
    pub fn schema(&self) -> AppResult<Arc<Schema>> {
        Schema::new(self.variables.clone())
    }

    /// Checks values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(GalileoError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.measurement.interval.is_zero() {
            return Err(GalileoError::Configuration(
                "measurement.interval must be greater than zero".into(),
            ));
        }

        let schema = self.schema()?;
        for required in ["n", "t"] {
            if !schema.contains(required) {
                return Err(GalileoError::Configuration(format!(
                    "Variable '{required}' must be declared (tick counter and timestamp)"
                )));
            }
        }

        self.validate_plot(&schema)?;

        if self.storage.backend == StorageBackend::Csv && self.storage.file_stem.trim().is_empty() {
            return Err(GalileoError::Configuration(
                "storage.file_stem cannot be empty".into(),
            ));
        }

        Ok(())
    }

    fn validate_plot(&self, schema: &Schema) -> AppResult<()> {
        let plot = &self.plot;
        if !plot.enabled {
            return Ok(());
        }
        let cols = plot.subplots.first().map_or(0, Vec::len);
        if cols == 0 {
            return Err(GalileoError::Configuration(
                "plot.subplots must contain at least one [x, y] pair".into(),
            ));
        }
        if plot.subplots.iter().any(|row| row.len() != cols) {
            return Err(GalileoError::Configuration(
                "plot.subplots rows must all have the same number of columns".into(),
            ));
        }
        if plot.refresh_interval.is_zero() || plot.listen_interval.is_zero() {
            return Err(GalileoError::Configuration(
                "plot.refresh_interval and plot.listen_interval must be greater than zero".into(),
            ));
        }
        if plot.downsample_ratio < 2 {
            return Err(GalileoError::Configuration(format!(
                "plot.downsample_ratio {} must be at least 2",
                plot.downsample_ratio
            )));
        }
        if plot.max_points < 2 * plot.downsample_ratio {
            return Err(GalileoError::Configuration(format!(
                "plot.max_points {} must be at least twice the downsample ratio {}",
                plot.max_points, plot.downsample_ratio
            )));
        }
        if plot.initial_points < 2 || plot.initial_points > plot.max_points {
            return Err(GalileoError::Configuration(format!(
                "plot.initial_points {} must lie within 2..={}",
                plot.initial_points, plot.max_points
            )));
        }
        if !(plot.overrange >= 0.0 && plot.overrange.is_finite()) {
            return Err(GalileoError::Configuration(format!(
                "plot.overrange {} must be a non-negative number",
                plot.overrange
            )));
        }
        // Resolves every referenced variable.
        plot.setup(schema).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.variables.len(), 6);
        assert_eq!(settings.plot.subplots.len(), 2);
        assert_eq!(settings.plot.quit_timeout, Duration::from_secs(3));
        assert!(settings.instruments.lockin.is_some());
    }

    #[test]
    fn test_toml_overrides() {
        let settings = Settings::from_toml_str(
            r#"
            [measurement]
            interval = "2ms"
            max_ticks = 10

            [plot]
            worker = "in_process"
            subplots = [[["t", "n"]]]

            [instruments.thermometer]
            type = "noisy"
            base = 4.2
            amplitude = 0.01
            seed = 7

            [instruments.lockin]
            type = "sr830"
            auto_sensitivity = [0.2, 0.8]
            transport = { port = "/dev/ttyUSB0", gpib_address = 8 }
            "#,
        )
        .unwrap();
        assert_eq!(settings.measurement.interval, Duration::from_millis(2));
        assert_eq!(settings.measurement.max_ticks, Some(10));
        assert_eq!(settings.plot.worker, PlotWorkerMode::InProcess);
        assert!(matches!(
            settings.instruments.thermometer,
            Some(ThermometerSettings::Noisy { seed: Some(7), .. })
        ));
        match settings.instruments.lockin {
            Some(LockInSettings::Sr830 { transport, auto_sensitivity, nan_on_error }) => {
                assert_eq!(transport.baud_rate, 9600);
                assert_eq!(transport.gpib_address, Some(8));
                assert_eq!(auto_sensitivity, Some([0.2, 0.8]));
                assert!(!nan_on_error);
            }
            other => panic!("unexpected lock-in settings: {other:?}"),
        }
    }

    #[test]
    fn test_variables_with_formats() {
        let settings = Settings::from_toml_str(
            r#"
            [[variables]]
            name = "n"
            format = "{:d}"

            [[variables]]
            name = "t"
            title = "t (s)"
            format = "{:.3f}"

            [plot]
            subplots = [[["t", "n"]]]
            "#,
        )
        .unwrap();
        assert_eq!(settings.variables.len(), 2);
        assert_eq!(settings.variables[1].format, ValueFormat::Fixed(3));
    }

    #[test]
    fn test_invalid_log_level() {
        let err = Settings::from_toml_str("[application]\nlog_level = \"loud\"").unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_subplot_must_reference_declared_variables() {
        let err = Settings::from_toml_str("[plot]\nsubplots = [[[\"t\", \"Q\"]]]").unwrap_err();
        assert!(err.to_string().contains("'Q'"));
    }

    #[test]
    fn test_ragged_subplot_grid_rejected() {
        let err = Settings::from_toml_str(
            "[plot]\nsubplots = [[[\"t\", \"T\"], [\"t\", \"X\"]], [[\"t\", \"H\"]]]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("same number of columns"));
    }

    #[test]
    fn test_tick_counter_required() {
        let err = Settings::from_toml_str(
            "[[variables]]\nname = \"t\"\n[plot]\nsubplots = [[[\"t\", \"t\"]]]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("'n'"));
    }

    #[test]
    fn test_setup_resolves_titles() {
        let settings = Settings::from_toml_str("").unwrap();
        let schema = settings.schema().unwrap();
        let setup = settings.plot.setup(&schema).unwrap();
        assert_eq!(setup.rows(), 2);
        assert_eq!(setup.cols(), 2);
        assert_eq!(setup.subplots[0][0].x_title, "T (K)");
        assert_eq!(setup.subplots[0][0].y_title, "X (V)");
    }
}
