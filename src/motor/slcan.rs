// Serial-line CAN adapter (SLCAN / LAWICEL text protocol)
//
// Standard data frame: t<id:3 hex><dlc:1 hex><data:2 hex per byte>\r
// The adapter owns the physical bus; we only hand it text lines.

use serialport::{self, SerialPort};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

use super::driver::{BusError, FrameSink};

/// Classic CAN carries at most 8 data bytes
const MAX_DLC: usize = 8;

/// Standard identifiers are 11 bits
const MAX_STD_ID: u16 = 0x7FF;

/// Bus bitrates understood by the adapter's `S<n>` command
const BITRATES_KBPS: [u32; 9] = [10, 20, 50, 100, 125, 250, 500, 800, 1000];

/// SLCAN adapter on a serial port
pub struct SerialCanSink {
    port: Box<dyn SerialPort>,
}

impl SerialCanSink {
    /// Open the adapter and bring the CAN channel up at `bitrate_kbps`
    pub fn open(
        port_name: &str,
        baudrate: u32,
        bitrate_kbps: u32,
        write_timeout: Duration,
    ) -> Result<Self, BusError> {
        let code = bitrate_code(bitrate_kbps).ok_or_else(|| {
            BusError::Unavailable(format!("unsupported CAN bitrate {} kbit/s", bitrate_kbps))
        })?;

        info!("Opening CAN adapter on {} ({} kbit/s)", port_name, bitrate_kbps);
        let port = serialport::new(port_name, baudrate)
            .timeout(write_timeout)
            .open()?;

        let mut sink = Self { port };
        // close first in case the channel was left open
        sink.write_line(b"C\r")?;
        sink.write_line(format!("S{}\r", code).as_bytes())?;
        sink.write_line(b"O\r")?;
        Ok(sink)
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), BusError> {
        self.port.write_all(line).map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                BusError::Closed
            } else {
                BusError::Io(e)
            }
        })?;
        self.port.flush()?;
        Ok(())
    }
}

impl FrameSink for SerialCanSink {
    async fn send(&mut self, id: u16, data: &[u8]) -> Result<(), BusError> {
        let line = frame_line(id, data)?;
        debug!("slcan: {}", line.trim_end());
        self.write_line(line.as_bytes())
    }
}

impl Drop for SerialCanSink {
    fn drop(&mut self) {
        // close the channel so the adapter stops acknowledging frames
        let _ = self.write_line(b"C\r");
    }
}

fn bitrate_code(kbps: u32) -> Option<usize> {
    BITRATES_KBPS.iter().position(|&b| b == kbps)
}

/// Text line for one standard data frame
fn frame_line(id: u16, data: &[u8]) -> Result<String, BusError> {
    if id > MAX_STD_ID {
        return Err(BusError::Transport(format!("id 0x{:X} is not a standard id", id)));
    }
    if data.len() > MAX_DLC {
        return Err(BusError::Transport(format!(
            "{} data bytes exceed classic CAN",
            data.len()
        )));
    }

    let mut line = format!("t{:03X}{:X}", id, data.len());
    for byte in data {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push('\r');
    Ok(line)
}
