//! Instrument drivers.
//!
//! One trait per hardware class. Drivers are synchronous: every call may block
//! on bus I/O, so the measurement loop only calls them from the blocking pool.
//!
//! - [`Thermometer`]: `(t, I, V, T)`
//! - [`LockIn`]: `(t, X, Y, R, theta, f, Vout)`
//! - [`Magnet`]: `(t, H, I)`
//!
//! `t` is the wall-clock time of the read in seconds since the Unix epoch.

use crate::config::{LockInSettings, MagnetSettings, ThermometerSettings};
use crate::error::AppResult;

pub mod lakeshore;
pub mod mock;
pub mod oxford;
pub mod scpi;
pub mod stanford;

/// One thermometer read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThermometerReading {
    /// Time of the read
    pub t: f64,
    /// Excitation current in A (NaN if the device does not report it)
    pub current: f64,
    /// Sensor voltage in V (NaN if the device does not report it)
    pub voltage: f64,
    /// Temperature in K
    pub temperature: f64,
}

impl ThermometerReading {
    /// Every field NaN, stamped now.
    pub fn unavailable() -> Self {
        Self {
            t: now_seconds(),
            current: f64::NAN,
            voltage: f64::NAN,
            temperature: f64::NAN,
        }
    }
}

/// One lock-in read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LockInReading {
    /// Time of the read
    pub t: f64,
    /// In-phase component in V
    pub x: f64,
    /// Quadrature component in V
    pub y: f64,
    /// Magnitude in V
    pub r: f64,
    /// Phase in degrees
    pub theta: f64,
    /// Reference frequency in Hz
    pub f: f64,
    /// Sine output amplitude in V
    pub vout: f64,
}

impl LockInReading {
    /// Every field NaN, stamped now.
    pub fn unavailable() -> Self {
        Self {
            t: now_seconds(),
            x: f64::NAN,
            y: f64::NAN,
            r: f64::NAN,
            theta: f64::NAN,
            f: f64::NAN,
            vout: f64::NAN,
        }
    }
}

/// One magnet read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MagnetReading {
    /// Time of the read
    pub t: f64,
    /// Field in T
    pub field: f64,
    /// Output current in A
    pub current: f64,
}

impl MagnetReading {
    /// Every field NaN, stamped now.
    pub fn unavailable() -> Self {
        Self {
            t: now_seconds(),
            field: f64::NAN,
            current: f64::NAN,
        }
    }
}

/// A temperature sensor.
pub trait Thermometer: Send {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Opens the link and checks the device identity. Idempotent.
    fn connect(&mut self) -> AppResult<()>;

    /// Takes one reading.
    fn read(&mut self) -> AppResult<ThermometerReading>;

    /// Releases the link.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// A lock-in amplifier.
pub trait LockIn: Send {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Opens the link and checks the device identity. Idempotent.
    fn connect(&mut self) -> AppResult<()>;

    /// Takes one reading.
    fn read(&mut self) -> AppResult<LockInReading>;

    /// Releases the link.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// A magnet power supply.
pub trait Magnet: Send {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Opens the link and checks the device identity. Idempotent.
    fn connect(&mut self) -> AppResult<()>;

    /// Takes one reading.
    fn read(&mut self) -> AppResult<MagnetReading>;

    /// Releases the link.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Seconds since the Unix epoch, microsecond resolution.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1.0e6
}

/// Builds the configured thermometer. Serial devices are not opened until `connect`.
pub fn build_thermometer(settings: &ThermometerSettings) -> AppResult<Box<dyn Thermometer>> {
    let device: Box<dyn Thermometer> = match settings {
        ThermometerSettings::Step { initial, step } => {
            Box::new(mock::StepThermometer::new(*initial, *step))
        }
        ThermometerSettings::Noisy {
            base,
            amplitude,
            seed,
        } => Box::new(mock::NoisyThermometer::new(*base, *amplitude, *seed)),
        ThermometerSettings::Lakeshore332 {
            transport, channel, ..
        } => Box::new(
            lakeshore::Lakeshore332::new(scpi::open_transport(transport)?, channel)?,
        ),
    };
    Ok(device)
}

/// Builds the configured lock-in amplifier.
pub fn build_lockin(settings: &LockInSettings) -> AppResult<Box<dyn LockIn>> {
    let device: Box<dyn LockIn> = match settings {
        LockInSettings::SinCos { omega } => Box::new(mock::SinCosLockIn::new(*omega)),
        LockInSettings::Const { reading } => Box::new(mock::ConstLockIn::new(*reading)),
        LockInSettings::Sr830 {
            transport,
            auto_sensitivity,
            ..
        } => {
            let mut device = stanford::StanfordLockIn::sr830(scpi::open_transport(transport)?);
            if let Some([low, high]) = auto_sensitivity {
                device.set_auto_sensitivity(*low, *high)?;
            }
            Box::new(device)
        }
        LockInSettings::Sr844 {
            transport,
            auto_sensitivity,
            ..
        } => {
            let mut device = stanford::StanfordLockIn::sr844(scpi::open_transport(transport)?);
            if let Some([low, high]) = auto_sensitivity {
                device.set_auto_sensitivity(*low, *high)?;
            }
            Box::new(device)
        }
    };
    Ok(device)
}

/// Builds the configured magnet power supply.
pub fn build_magnet(settings: &MagnetSettings) -> AppResult<Box<dyn Magnet>> {
    let device: Box<dyn Magnet> = match settings {
        MagnetSettings::Step { initial, step } => {
            Box::new(mock::StepMagnet::new(*initial, *step))
        }
        MagnetSettings::Ips120 { transport, .. } => {
            Box::new(oxford::Ips120::new(scpi::open_transport(transport)?))
        }
    };
    Ok(device)
}

/// Parses one numeric field of an instrument reply.
pub(crate) fn parse_field(device: &str, field: &str, raw: &str) -> AppResult<f64> {
    raw.trim().parse::<f64>().map_err(|e| {
        crate::error::GalileoError::Instrument(format!(
            "{device}: cannot parse {field} from '{}': {e}",
            raw.trim()
        ))
    })
}
