//! The configurable instrument rig: optional thermometer, magnet and lock-in.

use super::Experiment;
use crate::config::{LockInSettings, MagnetSettings, Settings, ThermometerSettings};
use crate::error::{AppResult, GalileoError};
use crate::instrument::{
    self, LockIn, LockInReading, Magnet, MagnetReading, Thermometer, ThermometerReading,
};
use crate::sample::{Sample, Schema};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A driver plus what to do when one of its reads fails.
struct Slot<D: ?Sized> {
    device: Box<D>,
    nan_on_error: bool,
}

impl<D: ?Sized> Slot<D> {
    fn new(device: Box<D>, nan_on_error: bool) -> Self {
        Self {
            device,
            nan_on_error,
        }
    }

    /// Applies the read policy: errors become `fallback()` when NaN-on-error is set.
    fn guard<R>(
        &self,
        name: &str,
        result: AppResult<R>,
        fallback: impl FnOnce() -> R,
    ) -> AppResult<R> {
        match result {
            Ok(reading) => Ok(reading),
            Err(err) if self.nan_on_error => {
                warn!(device = name, error = %err, "Read failed, recording NaN");
                Ok(fallback())
            }
            Err(err) => Err(err),
        }
    }
}

/// Experiment assembled from `[instruments]`.
///
/// Maintains `n` (tick counter, 1 on the first tick) and `t` (seconds since
/// `start`), and maps readings onto `T`, `I_therm`, `V_therm`, `H`, `I_mag`,
/// `X`, `Y`, `R`, `theta`, `f` and `Vout` where the schema declares them.
pub struct InstrumentExperiment {
    title: String,
    schema: Arc<Schema>,
    thermometer: Option<Slot<dyn Thermometer>>,
    lockin: Option<Slot<dyn LockIn>>,
    magnet: Option<Slot<dyn Magnet>>,
    n: u64,
    started: Option<Instant>,
    max_ticks: Option<u64>,
}

impl InstrumentExperiment {
    /// Builds drivers from settings. Nothing is opened until [`Experiment::start`].
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let mut experiment = Self::new(&settings.measurement.title, settings.schema()?)?;
        experiment.max_ticks = settings.measurement.max_ticks;

        if let Some(cfg) = &settings.instruments.thermometer {
            let nan_on_error = matches!(
                cfg,
                ThermometerSettings::Lakeshore332 {
                    nan_on_error: true,
                    ..
                }
            );
            experiment.thermometer = Some(Slot::new(instrument::build_thermometer(cfg)?, nan_on_error));
        }
        if let Some(cfg) = &settings.instruments.lockin {
            let nan_on_error = matches!(
                cfg,
                LockInSettings::Sr830 {
                    nan_on_error: true,
                    ..
                } | LockInSettings::Sr844 {
                    nan_on_error: true,
                    ..
                }
            );
            experiment.lockin = Some(Slot::new(instrument::build_lockin(cfg)?, nan_on_error));
        }
        if let Some(cfg) = &settings.instruments.magnet {
            let nan_on_error = matches!(
                cfg,
                MagnetSettings::Ips120 {
                    nan_on_error: true,
                    ..
                }
            );
            experiment.magnet = Some(Slot::new(instrument::build_magnet(cfg)?, nan_on_error));
        }
        Ok(experiment)
    }

    /// Experiment with no instruments; attach them with the `with_*` methods.
    pub fn new(title: &str, schema: Arc<Schema>) -> AppResult<Self> {
        for required in ["n", "t"] {
            if !schema.contains(required) {
                return Err(GalileoError::UnknownVariable(required.to_string()));
            }
        }
        Ok(Self {
            title: title.to_string(),
            schema,
            thermometer: None,
            lockin: None,
            magnet: None,
            n: 0,
            started: None,
            max_ticks: None,
        })
    }

    /// Attaches a thermometer.
    pub fn with_thermometer(mut self, device: Box<dyn Thermometer>, nan_on_error: bool) -> Self {
        self.thermometer = Some(Slot::new(device, nan_on_error));
        self
    }

    /// Attaches a lock-in amplifier.
    pub fn with_lockin(mut self, device: Box<dyn LockIn>, nan_on_error: bool) -> Self {
        self.lockin = Some(Slot::new(device, nan_on_error));
        self
    }

    /// Attaches a magnet power supply.
    pub fn with_magnet(mut self, device: Box<dyn Magnet>, nan_on_error: bool) -> Self {
        self.magnet = Some(Slot::new(device, nan_on_error));
        self
    }

    /// Ends the sequence after `max_ticks` ticks.
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    /// Ticks measured so far.
    pub fn ticks(&self) -> u64 {
        self.n
    }
}

impl Experiment for InstrumentExperiment {
    fn title(&self) -> &str {
        &self.title
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn start(&mut self) -> AppResult<()> {
        if let Some(slot) = self.thermometer.as_mut() {
            slot.device.connect()?;
            info!(device = slot.device.name(), "Thermometer ready");
        }
        if let Some(slot) = self.magnet.as_mut() {
            slot.device.connect()?;
            info!(device = slot.device.name(), "Magnet ready");
        }
        if let Some(slot) = self.lockin.as_mut() {
            slot.device.connect()?;
            info!(device = slot.device.name(), "Lock-in ready");
        }
        self.n = 0;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn advance(&mut self) -> bool {
        self.max_ticks.map_or(true, |max| self.n < max)
    }

    fn measure(&mut self, sample: &mut Sample) -> AppResult<()> {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.n += 1;
        sample.set("n", self.n as f64)?;
        sample.set("t", started.elapsed().as_secs_f64())?;

        if let Some(slot) = self.thermometer.as_mut() {
            let name = slot.device.name().to_string();
            let result = slot.device.read();
            let reading = slot.guard(&name, result, ThermometerReading::unavailable)?;
            sample.set_if_declared("T", reading.temperature);
            sample.set_if_declared("I_therm", reading.current);
            sample.set_if_declared("V_therm", reading.voltage);
        }
        if let Some(slot) = self.magnet.as_mut() {
            let name = slot.device.name().to_string();
            let result = slot.device.read();
            let reading = slot.guard(&name, result, MagnetReading::unavailable)?;
            sample.set_if_declared("H", reading.field);
            sample.set_if_declared("I_mag", reading.current);
        }
        if let Some(slot) = self.lockin.as_mut() {
            let name = slot.device.name().to_string();
            let result = slot.device.read();
            let reading = slot.guard(&name, result, LockInReading::unavailable)?;
            sample.set_if_declared("X", reading.x);
            sample.set_if_declared("Y", reading.y);
            sample.set_if_declared("R", reading.r);
            sample.set_if_declared("theta", reading.theta);
            sample.set_if_declared("f", reading.f);
            sample.set_if_declared("Vout", reading.vout);
        }
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        let mut errors = Vec::new();
        if let Some(slot) = self.lockin.as_mut() {
            if let Err(e) = slot.device.close() {
                errors.push(e);
            }
        }
        if let Some(slot) = self.magnet.as_mut() {
            if let Err(e) = slot.device.close() {
                errors.push(e);
            }
        }
        if let Some(slot) = self.thermometer.as_mut() {
            if let Err(e) = slot.device.close() {
                errors.push(e);
            }
        }
        info!(ticks = self.n, "Experiment finished");
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(GalileoError::ShutdownFailed(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{ConstLockIn, StepMagnet, StepThermometer};
    use crate::instrument::scpi::ScriptedTransport;
    use crate::instrument::stanford::StanfordLockIn;
    use crate::sample::VariableSpec;

    fn schema() -> Arc<Schema> {
        Schema::new(
            ["n", "t", "T", "H", "X", "Y"]
                .into_iter()
                .map(VariableSpec::new)
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_counts_ticks_and_maps_readings() {
        let mut exp = InstrumentExperiment::new("sim", schema())
            .unwrap()
            .with_thermometer(Box::new(StepThermometer::new(300.0, -1.0)), false)
            .with_magnet(Box::new(StepMagnet::new(0.0, 0.5)), false)
            .with_lockin(Box::new(ConstLockIn::new(2.0)), false);
        exp.start().unwrap();
        let mut sample = Sample::new(exp.schema());
        exp.measure(&mut sample).unwrap();
        exp.measure(&mut sample).unwrap();
        assert_eq!(sample.get("n"), Some(2.0));
        assert_eq!(sample.get("T"), Some(298.0));
        assert_eq!(sample.get("H"), Some(1.0));
        assert_eq!(sample.get("X"), Some(2.0));
        assert!(sample.get("t").unwrap() >= 0.0);
        exp.finish().unwrap();
    }

    #[test]
    fn test_max_ticks_ends_sequence() {
        let mut exp = InstrumentExperiment::new("finite", schema())
            .unwrap()
            .with_max_ticks(2);
        exp.start().unwrap();
        let mut sample = Sample::new(exp.schema());
        let mut ticks = 0;
        while exp.advance() {
            exp.measure(&mut sample).unwrap();
            ticks += 1;
        }
        assert_eq!(ticks, 2);
    }

    #[test]
    fn test_failed_read_propagates_by_default() {
        let transport = ScriptedTransport::new().fail_query("SNAP?1,2,3,4,9", "timeout");
        let mut exp = InstrumentExperiment::new("strict", schema())
            .unwrap()
            .with_lockin(Box::new(StanfordLockIn::sr830(Box::new(transport))), false);
        let mut sample = Sample::new(exp.schema());
        assert!(exp.measure(&mut sample).is_err());
    }

    #[test]
    fn test_failed_read_becomes_nan_when_configured() {
        let transport = ScriptedTransport::new().fail_query("SNAP?1,2,3,4,9", "timeout");
        let mut exp = InstrumentExperiment::new("lenient", schema())
            .unwrap()
            .with_lockin(Box::new(StanfordLockIn::sr830(Box::new(transport))), true);
        let mut sample = Sample::new(exp.schema());
        exp.measure(&mut sample).unwrap();
        assert!(sample.get("X").unwrap().is_nan());
        assert_eq!(sample.get("n"), Some(1.0));
    }

    #[test]
    fn test_schema_must_declare_counter() {
        let schema = Schema::new(vec![VariableSpec::new("T")]).unwrap();
        assert!(InstrumentExperiment::new("bad", schema).is_err());
    }

    #[test]
    fn test_from_default_settings() {
        let settings = Settings::from_toml_str("").unwrap();
        let mut exp = InstrumentExperiment::from_settings(&settings).unwrap();
        exp.start().unwrap();
        let mut sample = Sample::new(exp.schema());
        exp.measure(&mut sample).unwrap();
        assert!((sample.get("T").unwrap() - 299.99).abs() < 1e-9);
    }
}
