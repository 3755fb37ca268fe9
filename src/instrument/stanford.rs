//! Stanford Research Systems SR830 / SR844 lock-in amplifiers.
//!
//! Both models share the command set used here. A read is one `SNAP?` query
//! for X, Y, R, theta and f, plus `SLVL?` for the sine output on the SR830.
//! With auto-sensitivity enabled, every read ends by stepping the sensitivity
//! range one notch when R leaves the `[low, high]` band of full scale or the
//! input is overloaded.

use super::{now_seconds, parse_field, LockIn, LockInReading};
use super::scpi::ScpiTransport;
use crate::error::{AppResult, GalileoError};
use tracing::{debug, info};

/// Full-scale sensitivities in V, indexed by the `SENS` setting.
pub const SENSITIVITIES: [f64; 27] = [
    2.0e-9, 5.0e-9, 10.0e-9, 2.0e-8, 5.0e-8, 10.0e-8, 2.0e-7, 5.0e-7, 10.0e-7, 2.0e-6, 5.0e-6,
    10.0e-6, 2.0e-5, 5.0e-5, 10.0e-5, 2.0e-4, 5.0e-4, 10.0e-4, 2.0e-3, 5.0e-3, 10.0e-3, 2.0e-2,
    5.0e-2, 10.0e-2, 2.0e-1, 5.0e-1, 10.0e-1,
];

/// Model-specific details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    /// Substring expected in the `*IDN?` reply
    pub identity: &'static str,
    /// `SNAP?` query returning X, Y, R, theta, f in that order
    pub snap_query: &'static str,
    /// Whether the sine output amplitude can be queried
    pub has_sine_output: bool,
}

/// SR830 DSP lock-in.
pub const SR830: Model = Model {
    identity: "SR830",
    snap_query: "SNAP?1,2,3,4,9",
    has_sine_output: true,
};

/// SR844 RF lock-in.
pub const SR844: Model = Model {
    identity: "SR844",
    snap_query: "SNAP?1,2,3,5,8",
    has_sine_output: false,
};

/// Which way to move the sensitivity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityStep {
    /// Coarser range (larger full scale)
    Up,
    /// Finer range
    Down,
    /// Leave as is
    Hold,
}

/// Decides the sensitivity change for magnitude `r` at setting `index`.
///
/// Overload steps to the coarser range, or to the finer one when already at
/// the coarsest.
pub fn sensitivity_step(index: usize, r: f64, overloaded: bool, low: f64, high: f64) -> SensitivityStep {
    let top = SENSITIVITIES.len() - 1;
    let full_scale = SENSITIVITIES[index.min(top)];
    let fraction = r.abs() / full_scale;
    if index < top && (overloaded || fraction > high) {
        SensitivityStep::Up
    } else if index > 0 && (overloaded || fraction < low) {
        SensitivityStep::Down
    } else {
        SensitivityStep::Hold
    }
}

/// A Stanford lock-in on a [`ScpiTransport`].
pub struct StanfordLockIn {
    model: Model,
    name: String,
    transport: Box<dyn ScpiTransport>,
    connected: bool,
    auto_sensitivity: Option<(f64, f64)>,
}

impl StanfordLockIn {
    /// Driver for `model`.
    pub fn new(model: Model, transport: Box<dyn ScpiTransport>) -> Self {
        Self {
            model,
            name: model.identity.to_string(),
            transport,
            connected: false,
            auto_sensitivity: None,
        }
    }

    /// SR830 driver.
    pub fn sr830(transport: Box<dyn ScpiTransport>) -> Self {
        Self::new(SR830, transport)
    }

    /// SR844 driver.
    pub fn sr844(transport: Box<dyn ScpiTransport>) -> Self {
        Self::new(SR844, transport)
    }

    /// Enables auto-sensitivity with band `[low, high]` as fractions of full scale.
    pub fn set_auto_sensitivity(&mut self, low: f64, high: f64) -> AppResult<()> {
        if !(0.0 < low && low < high && high <= 1.0) {
            return Err(GalileoError::Configuration(format!(
                "{}: auto_sensitivity band [{low}, {high}] must satisfy 0 < low < high <= 1",
                self.name
            )));
        }
        self.auto_sensitivity = Some((low, high));
        Ok(())
    }

    fn adjust_sensitivity(&mut self, r: f64, low: f64, high: f64) -> AppResult<()> {
        let raw = self.transport.query("SENS?")?;
        let index = raw.trim().parse::<usize>().map_err(|e| {
            GalileoError::Instrument(format!("{}: bad SENS? reply '{raw}': {e}", self.name))
        })?;
        if index >= SENSITIVITIES.len() {
            return Err(GalileoError::Instrument(format!(
                "{}: sensitivity index {index} out of range",
                self.name
            )));
        }
        let status = self.transport.query("LIAS?")?;
        let status = status.trim().parse::<u32>().map_err(|e| {
            GalileoError::Instrument(format!("{}: bad LIAS? reply '{status}': {e}", self.name))
        })?;
        let overloaded = status % 8 != 0;

        let next = match sensitivity_step(index, r, overloaded, low, high) {
            SensitivityStep::Up => index + 1,
            SensitivityStep::Down => index - 1,
            SensitivityStep::Hold => return Ok(()),
        };
        debug!(
            device = %self.name,
            from = SENSITIVITIES[index],
            to = SENSITIVITIES[next],
            overloaded,
            "Changing sensitivity"
        );
        self.transport.write(&format!("SENS {next}"))
    }
}

impl LockIn for StanfordLockIn {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> AppResult<()> {
        if self.connected {
            return Ok(());
        }
        self.transport.open()?;
        let reply = self.transport.query("*IDN?")?;
        if !reply.contains(self.model.identity) {
            return Err(GalileoError::IdentityMismatch {
                device: self.name.clone(),
                expected: self.model.identity.to_string(),
                reply,
            });
        }
        self.transport.write("*CLS")?;
        self.connected = true;
        info!(device = %self.name, "Lock-in amplifier connected");
        Ok(())
    }

    fn read(&mut self) -> AppResult<LockInReading> {
        let snap = self.transport.query(self.model.snap_query)?;
        let t = now_seconds();
        let fields: Vec<&str> = snap.split(',').collect();
        if fields.len() != 5 {
            return Err(GalileoError::Instrument(format!(
                "{}: expected 5 fields from {}, got '{snap}'",
                self.name, self.model.snap_query
            )));
        }
        let x = parse_field(&self.name, "X", fields[0])?;
        let y = parse_field(&self.name, "Y", fields[1])?;
        let r = parse_field(&self.name, "R", fields[2])?;
        let theta = parse_field(&self.name, "theta", fields[3])?;
        let f = parse_field(&self.name, "f", fields[4])?;

        let vout = if self.model.has_sine_output {
            let raw = self.transport.query("SLVL?")?;
            parse_field(&self.name, "Vout", &raw)?
        } else {
            0.0
        };

        if let Some((low, high)) = self.auto_sensitivity {
            self.adjust_sensitivity(r, low, high)?;
        }

        Ok(LockInReading {
            t,
            x,
            y,
            r,
            theta,
            f,
            vout,
        })
    }

    fn close(&mut self) -> AppResult<()> {
        self.connected = false;
        self.transport.close()
    }
}
