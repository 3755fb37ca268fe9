//! Simulated instruments for dry runs and tests.
use super::{
    now_seconds, LockIn, LockInReading, Magnet, MagnetReading, Thermometer, ThermometerReading,
};
use crate::error::AppResult;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Temperature that moves by a fixed step on every read.
pub struct StepThermometer {
    temperature: f64,
    step: f64,
}

impl StepThermometer {
    /// Starts at `initial`; each read adds `step` first.
    pub fn new(initial: f64, step: f64) -> Self {
        Self {
            temperature: initial,
            step,
        }
    }
}

impl Default for StepThermometer {
    fn default() -> Self {
        Self::new(300.0, -1.0)
    }
}

impl Thermometer for StepThermometer {
    fn name(&self) -> &str {
        "StepThermometer"
    }

    fn connect(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn read(&mut self) -> AppResult<ThermometerReading> {
        self.temperature += self.step;
        Ok(ThermometerReading {
            t: now_seconds(),
            current: 0.0,
            voltage: 0.0,
            temperature: self.temperature,
        })
    }
}

/// Constant temperature with uniform noise.
pub struct NoisyThermometer {
    base: f64,
    amplitude: f64,
    rng: StdRng,
}

impl NoisyThermometer {
    /// Noise in `[base - amplitude, base + amplitude]`; a seed makes runs repeatable.
    pub fn new(base: f64, amplitude: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base,
            amplitude: amplitude.abs(),
            rng,
        }
    }
}

impl Thermometer for NoisyThermometer {
    fn name(&self) -> &str {
        "NoisyThermometer"
    }

    fn connect(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn read(&mut self) -> AppResult<ThermometerReading> {
        let noise = if self.amplitude > 0.0 {
            self.rng.gen_range(-self.amplitude..=self.amplitude)
        } else {
            0.0
        };
        Ok(ThermometerReading {
            t: now_seconds(),
            current: 0.0,
            voltage: 0.0,
            temperature: self.base + noise,
        })
    }
}

/// X = sin(phase), Y = cos(phase), phase advancing by `omega` per read.
pub struct SinCosLockIn {
    omega: f64,
    phase: f64,
}

impl SinCosLockIn {
    /// Starts at phase 0.
    pub fn new(omega: f64) -> Self {
        Self { omega, phase: 0.0 }
    }
}

impl LockIn for SinCosLockIn {
    fn name(&self) -> &str {
        "SinCosLockIn"
    }

    fn connect(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn read(&mut self) -> AppResult<LockInReading> {
        let (x, y) = self.phase.sin_cos();
        self.phase += self.omega;
        Ok(LockInReading {
            t: now_seconds(),
            x,
            y,
            r: x.hypot(y),
            theta: x.atan2(y).to_degrees(),
            f: 0.0,
            vout: 0.0,
        })
    }
}

/// Every field reads the same value.
pub struct ConstLockIn {
    reading: f64,
}

impl ConstLockIn {
    /// Lock-in reading `reading` everywhere.
    pub fn new(reading: f64) -> Self {
        Self { reading }
    }
}

impl LockIn for ConstLockIn {
    fn name(&self) -> &str {
        "ConstLockIn"
    }

    fn connect(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn read(&mut self) -> AppResult<LockInReading> {
        let v = self.reading;
        Ok(LockInReading {
            t: now_seconds(),
            x: v,
            y: v,
            r: v,
            theta: v,
            f: v,
            vout: v,
        })
    }
}

/// Field that moves by a fixed step on every read.
pub struct StepMagnet {
    field: f64,
    step: f64,
}

impl StepMagnet {
    /// Starts at `initial`; each read adds `step` first.
    pub fn new(initial: f64, step: f64) -> Self {
        Self {
            field: initial,
            step,
        }
    }
}

impl Default for StepMagnet {
    fn default() -> Self {
        Self::new(0.0, 1.0e-3)
    }
}

impl Magnet for StepMagnet {
    fn name(&self) -> &str {
        "StepMagnet"
    }

    fn connect(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn read(&mut self) -> AppResult<MagnetReading> {
        self.field += self.step;
        Ok(MagnetReading {
            t: now_seconds(),
            field: self.field,
            current: 0.0,
        })
    }
}
