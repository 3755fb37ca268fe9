//! Oxford Instruments IPS120-10 superconducting magnet power supply.
//!
//! The IPS speaks the ISOBUS single-letter protocol: `V` returns the version
//! string, `X` the status block `XmnAnCnHnMmnPmn`, `Rn` a parameter as
//! `R<value>`. With the persistent-switch heater off the leads are de-energised
//! and the field lives in the magnet, so it is read from the persistent
//! register (`R18`) instead of the output register (`R7`).

use super::scpi::ScpiTransport;
use super::{now_seconds, parse_field, Magnet, MagnetReading};
use crate::error::{AppResult, GalileoError};
use tracing::info;

const IDENTITY: &str = "IPS120";

/// Heater state digit position in the `X` status block.
const HEATER_INDEX: usize = 8;

/// IPS120-10 driver.
pub struct Ips120 {
    name: String,
    transport: Box<dyn ScpiTransport>,
    connected: bool,
}

impl Ips120 {
    /// Driver on `transport`.
    pub fn new(transport: Box<dyn ScpiTransport>) -> Self {
        Self {
            name: "IPS120".to_string(),
            transport,
            connected: false,
        }
    }

    fn read_parameter(&mut self, register: u8, field: &str) -> AppResult<f64> {
        let reply = self.transport.query(&format!("R{register}"))?;
        let value = reply.trim().strip_prefix('R').ok_or_else(|| {
            GalileoError::Instrument(format!("{}: bad reply to R{register}: '{reply}'", self.name))
        })?;
        parse_field(&self.name, field, value)
    }
}

/// True when the status block reports the persistent-switch heater off
/// (`H0` off at zero field, `H2` off at field).
pub fn is_persistent(status: &str) -> bool {
    matches!(status.as_bytes().get(HEATER_INDEX), Some(b'0') | Some(b'2'))
}

impl Magnet for Ips120 {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> AppResult<()> {
        if self.connected {
            return Ok(());
        }
        self.transport.open()?;
        // Remote and unlocked.
        self.transport.write("C3")?;
        let reply = self.transport.query("V")?;
        if !reply.contains(IDENTITY) {
            return Err(GalileoError::IdentityMismatch {
                device: self.name.clone(),
                expected: IDENTITY.to_string(),
                reply,
            });
        }
        self.connected = true;
        info!(device = %self.name, "Magnet power supply connected");
        Ok(())
    }

    fn read(&mut self) -> AppResult<MagnetReading> {
        let status = self.transport.query("X")?;
        let field = if is_persistent(&status) {
            self.read_parameter(18, "persistent field")?
        } else {
            self.read_parameter(7, "field")?
        };
        let t = now_seconds();
        let current = self.read_parameter(0, "output current")?;
        Ok(MagnetReading { t, field, current })
    }

    fn close(&mut self) -> AppResult<()> {
        if self.connected {
            // Back to local and locked.
            self.transport.write("C0")?;
        }
        self.connected = false;
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::scpi::ScriptedTransport;

    #[test]
    fn test_status_heater_digit() {
        assert!(is_persistent("X00A0C3H0M00P03"));
        assert!(is_persistent("X00A0C3H2M00P03"));
        assert!(!is_persistent("X00A0C3H1M00P03"));
        assert!(!is_persistent("X0"));
    }

    #[test]
    fn test_read_uses_output_register_with_heater_on() {
        let transport = ScriptedTransport::new()
            .expect_query("X", "X00A0C3H1M00P03")
            .expect_query("R7", "R+0.5000")
            .expect_query("R0", "R+12.34");
        let mut magnet = Ips120::new(Box::new(transport));
        let reading = magnet.read().unwrap();
        assert_eq!(reading.field, 0.5);
        assert_eq!(reading.current, 12.34);
    }

    #[test]
    fn test_read_uses_persistent_register_with_heater_off() {
        let transport = ScriptedTransport::new()
            .expect_query("X", "X00A0C3H2M00P03")
            .expect_query("R18", "R-1.2500")
            .expect_query("R0", "R+0.00");
        let mut magnet = Ips120::new(Box::new(transport));
        assert_eq!(magnet.read().unwrap().field, -1.25);
    }

    #[test]
    fn test_connect_and_close() {
        let transport = ScriptedTransport::new().expect_query("V", "IPS120-10  Version 3.07");
        let sent = transport.sent();
        let mut magnet = Ips120::new(Box::new(transport));
        magnet.connect().unwrap();
        magnet.close().unwrap();
        assert_eq!(sent.lock().unwrap().as_slice(), ["C3", "V", "C0"]);
    }
}
