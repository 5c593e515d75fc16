// Serial output sink for the LOR network. Besides real ports, two
// side-effect device names are recognized: "null" silently discards
// everything (dry runs) and "stdout" prints the byte stream as hex with
// a line break at each stop byte (packet inspection).

use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;

use crate::error::{PlayerError, Result};

/// Write timeout for the underlying port. Writes queue into the OS
/// buffer; `drain` provides the real back-pressure.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

pub enum SerialSink {
    Null,
    Stdout,
    Port(Box<dyn SerialPort>),
    /// Captures the byte stream for test inspection.
    #[cfg(test)]
    Capture(Vec<u8>),
}

impl SerialSink {
    /// Opens a write-only sink on `device` at `baud`, configured 8-N-1.
    /// An empty device name falls back to the null sink.
    pub fn open(device: &str, baud: u32) -> Result<Self> {
        if baud == 0 {
            return Err(PlayerError::InvalidArg("baud rate must be non-zero".into()));
        }

        if device.is_empty() || device.eq_ignore_ascii_case("null") {
            return Ok(Self::Null);
        }
        if device.eq_ignore_ascii_case("stdout") {
            return Ok(Self::Stdout);
        }

        let port = serialport::new(device, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => PlayerError::NoSerialDevice(device.into()),
                _ => PlayerError::SerialInit(format!("{device}: {e}")),
            })?;

        log::info!("opened serial port {device} at {baud} baud (8-N-1)");
        Ok(Self::Port(port))
    }

    /// Queues `b` for transmission. Write failures are logged rather
    /// than propagated; a dead link surfaces as drain stalls.
    pub fn write(&mut self, b: &[u8]) {
        match self {
            Self::Null => {}
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                for &c in b {
                    let _ = if c == 0x00 {
                        writeln!(out)
                    } else {
                        write!(out, "0x{c:02X} ")
                    };
                }
            }
            Self::Port(port) => {
                if let Err(e) = port.write_all(b) {
                    log::error!("serial write failed: {e}");
                }
            }
            #[cfg(test)]
            Self::Capture(buf) => buf.extend_from_slice(b),
        }
    }

    /// Blocks until the hardware transmit buffer is flushed. This is the
    /// player's back-pressure point: a slow link costs frames instead of
    /// buffering without bound.
    pub fn drain(&mut self) {
        match self {
            Self::Null => {}
            Self::Stdout => {
                let _ = std::io::stdout().flush();
            }
            Self::Port(port) => {
                if let Err(e) = port.flush() {
                    log::error!("serial drain failed: {e}");
                }
            }
            #[cfg(test)]
            Self::Capture(_) => {}
        }
    }

    /// Enumerates the serial ports available on this machine.
    pub fn list_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()
            .map_err(|e| PlayerError::SerialInit(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}
