//! Lakeshore Model 332 temperature controller, one input channel.

use super::scpi::ScpiTransport;
use super::{now_seconds, Thermometer, ThermometerReading};
use crate::error::{AppResult, GalileoError};
use tracing::{info, warn};

const IDENTITY: &str = "LSCI,MODEL332";

/// One sensor input of a Model 332.
///
/// Unparseable `KRDG?` replies (the controller answers with overrange markers
/// when the sensor is open) read as NaN instead of failing.
pub struct Lakeshore332 {
    name: String,
    channel: String,
    transport: Box<dyn ScpiTransport>,
    connected: bool,
}

impl Lakeshore332 {
    /// Driver reading `channel` ("A" or "B").
    pub fn new(transport: Box<dyn ScpiTransport>, channel: &str) -> AppResult<Self> {
        let channel = channel.trim().to_ascii_uppercase();
        if channel != "A" && channel != "B" {
            return Err(GalileoError::Configuration(format!(
                "Lakeshore 332 channel must be 'A' or 'B', got '{channel}'"
            )));
        }
        Ok(Self {
            name: format!("Lakeshore332[{channel}]"),
            channel,
            transport,
            connected: false,
        })
    }
}

impl Thermometer for Lakeshore332 {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> AppResult<()> {
        if self.connected {
            return Ok(());
        }
        self.transport.open()?;
        let reply = self.transport.query("*IDN?")?;
        if !reply.contains(IDENTITY) {
            return Err(GalileoError::IdentityMismatch {
                device: self.name.clone(),
                expected: IDENTITY.to_string(),
                reply,
            });
        }
        self.transport.write("*CLS")?;
        self.connected = true;
        info!(device = %self.name, "Temperature controller connected");
        Ok(())
    }

    fn read(&mut self) -> AppResult<ThermometerReading> {
        if !self.connected {
            self.connect()?;
        }
        let raw = self.transport.query(&format!("KRDG? {}", self.channel))?;
        let t = now_seconds();
        let temperature = match raw.trim().parse::<f64>() {
            Ok(kelvin) => kelvin,
            Err(_) => {
                warn!(device = %self.name, reply = %raw, "Unreadable temperature, recording NaN");
                f64::NAN
            }
        };
        Ok(ThermometerReading {
            t,
            current: f64::NAN,
            voltage: f64::NAN,
            temperature,
        })
    }

    fn close(&mut self) -> AppResult<()> {
        self.connected = false;
        self.transport.close()
    }
}
