//! Line-oriented request/response transports.
//!
//! Drivers speak ASCII commands terminated by a line terminator and read one
//! reply line per query. [`SerialTransport`] covers RS-232 instruments and
//! GPIB devices behind a Prologix-style USB bridge; [`ScriptedTransport`]
//! replays canned replies for driver tests.

use crate::config::TransportSettings;
use crate::error::{AppResult, GalileoError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Blocking query/write link to one instrument.
pub trait ScpiTransport: Send {
    /// Opens the link. Calling it on an open link does nothing.
    fn open(&mut self) -> AppResult<()>;

    /// Sends a command that produces no reply.
    fn write(&mut self, command: &str) -> AppResult<()>;

    /// Sends a command and reads one reply line, trimmed.
    fn query(&mut self, command: &str) -> AppResult<String>;

    /// Closes the link.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Opens the transport described by `settings` (lazily; nothing touches the
/// port until [`ScpiTransport::open`]).
pub fn open_transport(settings: &TransportSettings) -> AppResult<Box<dyn ScpiTransport>> {
    Ok(Box::new(SerialTransport::new(settings.clone())))
}

/// Serial port transport, optionally addressing a GPIB device through a bridge.
pub struct SerialTransport {
    settings: TransportSettings,
    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Transport for `settings`; the port stays closed until `open`.
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Port name, for logs.
    pub fn port_name(&self) -> &str {
        &self.settings.port
    }
}

#[cfg(feature = "instrument_serial")]
mod serial_enabled {
    use super::*;
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};
    use tracing::debug;

    impl SerialTransport {
        fn port(&mut self) -> AppResult<&mut Box<dyn serialport::SerialPort>> {
            let name = self.settings.port.clone();
            self.port
                .as_mut()
                .ok_or_else(|| GalileoError::Instrument(format!("Serial port '{name}' is not open")))
        }

        fn send_line(&mut self, command: &str) -> AppResult<()> {
            let line = format!("{command}{}", self.settings.terminator);
            let port = self.port()?;
            port.write_all(line.as_bytes())?;
            port.flush()?;
            debug!(command = command.trim(), "Sent serial command");
            Ok(())
        }

        fn read_line(&mut self) -> AppResult<String> {
            let timeout = self.settings.timeout;
            let port = self.port()?;
            let mut response = Vec::new();
            let mut byte = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(GalileoError::Instrument(format!(
                        "Serial read timeout after {timeout:?}"
                    )));
                }
                match port.read(&mut byte) {
                    Ok(1) => {
                        if byte[0] == b'\n' {
                            break;
                        }
                        response.push(byte[0]);
                    }
                    Ok(_) => {
                        return Err(GalileoError::Instrument(
                            "Unexpected EOF on serial port".to_string(),
                        ));
                    }
                    // The port timeout is shorter than ours.
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let response = String::from_utf8_lossy(&response).trim().to_string();
            debug!(%response, "Received serial response");
            Ok(response)
        }

        pub(super) fn open_port(&mut self) -> AppResult<()> {
            if self.port.is_some() {
                return Ok(());
            }
            let port = serialport::new(&self.settings.port, self.settings.baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| {
                    GalileoError::Instrument(format!(
                        "Failed to open serial port '{}' at {} baud: {e}",
                        self.settings.port, self.settings.baud_rate
                    ))
                })?;
            self.port = Some(port);
            debug!(port = %self.settings.port, baud = self.settings.baud_rate, "Serial port opened");

            if let Some(address) = self.settings.gpib_address {
                self.send_line("++mode 1")?;
                self.send_line(&format!("++addr {address}"))?;
                self.send_line("++auto 1")?;
            }
            Ok(())
        }

        pub(super) fn write_command(&mut self, command: &str) -> AppResult<()> {
            self.send_line(command)
        }

        pub(super) fn query_command(&mut self, command: &str) -> AppResult<String> {
            self.send_line(command)?;
            self.read_line()
        }

        pub(super) fn close_port(&mut self) {
            if self.port.take().is_some() {
                debug!(port = %self.settings.port, "Serial port closed");
            }
        }
    }
}

#[cfg(not(feature = "instrument_serial"))]
mod serial_disabled {
    use super::*;

    fn disabled() -> GalileoError {
        GalileoError::FeatureNotEnabled("instrument_serial".to_string())
    }

    impl SerialTransport {
        pub(super) fn open_port(&mut self) -> AppResult<()> {
            Err(disabled())
        }

        pub(super) fn write_command(&mut self, _command: &str) -> AppResult<()> {
            Err(disabled())
        }

        pub(super) fn query_command(&mut self, _command: &str) -> AppResult<String> {
            Err(disabled())
        }

        pub(super) fn close_port(&mut self) {}
    }
}

impl ScpiTransport for SerialTransport {
    fn open(&mut self) -> AppResult<()> {
        self.open_port()
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        self.write_command(command)
    }

    fn query(&mut self, command: &str) -> AppResult<String> {
        self.query_command(command)
    }

    fn close(&mut self) -> AppResult<()> {
        self.close_port();
        Ok(())
    }
}

/// What the scripted device does when queried.
#[derive(Debug, Clone)]
enum Reply {
    Line(String),
    Fail(String),
}

/// In-memory transport replaying scripted replies in order.
///
/// Every write and query is recorded; [`ScriptedTransport::sent`] returns a
/// handle that stays readable after the transport is boxed into a driver.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    replies: VecDeque<(String, Reply)>,
    sent: Arc<Mutex<Vec<String>>>,
    open: bool,
}

impl ScriptedTransport {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the next query, which must be `command`, with `reply`.
    pub fn expect_query(mut self, command: &str, reply: &str) -> Self {
        self.replies
            .push_back((command.to_string(), Reply::Line(reply.to_string())));
        self
    }

    /// Fails the next query, which must be `command`, with a bus error.
    pub fn fail_query(mut self, command: &str, message: &str) -> Self {
        self.replies
            .push_back((command.to_string(), Reply::Fail(message.to_string())));
        self
    }

    /// True between `open` and `close`.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Shared log of every command sent.
    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    fn record(&self, command: &str) {
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push(command.to_string());
    }
}

impl ScpiTransport for ScriptedTransport {
    fn open(&mut self) -> AppResult<()> {
        self.open = true;
        Ok(())
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        self.record(command);
        Ok(())
    }

    fn query(&mut self, command: &str) -> AppResult<String> {
        self.record(command);
        match self.replies.pop_front() {
            Some((expected, reply)) if expected.eq_ignore_ascii_case(command) => match reply {
                Reply::Line(line) => Ok(line),
                Reply::Fail(message) => Err(GalileoError::Instrument(message)),
            },
            Some((expected, _)) => Err(GalileoError::Instrument(format!(
                "Scripted transport expected query '{expected}', got '{command}'"
            ))),
            None => Err(GalileoError::Instrument(format!(
                "Scripted transport has no reply for '{command}'"
            ))),
        }
    }

    fn close(&mut self) -> AppResult<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replies_in_order() {
        let mut transport = ScriptedTransport::new()
            .expect_query("*IDN?", "ACME,1")
            .expect_query("VAL?", "2.5");
        let sent = transport.sent();
        transport.write("*CLS").unwrap();
        assert_eq!(transport.query("*idn?").unwrap(), "ACME,1");
        assert_eq!(transport.query("VAL?").unwrap(), "2.5");
        assert!(transport.query("VAL?").is_err());
        assert_eq!(sent.lock().unwrap().as_slice(), ["*CLS", "*idn?", "VAL?", "VAL?"]);
    }

    #[test]
    fn test_scripted_rejects_out_of_order_query() {
        let mut transport = ScriptedTransport::new().expect_query("A?", "1");
        let err = transport.query("B?").unwrap_err();
        assert!(err.to_string().contains("expected query 'A?'"));
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[test]
    fn test_serial_transport_requires_feature() {
        let settings = TransportSettings {
            port: "/dev/null".into(),
            baud_rate: 9600,
            timeout: std::time::Duration::from_millis(10),
            gpib_address: None,
            terminator: "\n".into(),
        };
        let mut transport = SerialTransport::new(settings);
        assert!(matches!(
            transport.open(),
            Err(GalileoError::FeatureNotEnabled(_))
        ));
    }
}
