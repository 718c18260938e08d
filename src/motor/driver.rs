// Rate-limited bus writer
//
// Each tick the runtime submits a fresh frame per motor. Frames to the same
// node and register are coalesced: only the newest one is kept, and it goes
// out once the node's minimum interval has passed. Nothing is queued and
// nothing is retried, so stale motion commands never reach the wheels.
// A flush sends in ascending node id order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::kinematics::MotorTarget;
use super::owl_can::{CanFrame, Command, FrameError, Value};
use crate::config::{BUS_MIN_INTERVAL, BUS_MSG_ID, BUS_SEND_TIMEOUT, PlatformConfig};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus not available: {0}")]
    Unavailable(String),

    #[error("Bus closed")]
    Closed,

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Anything that can put an encoded frame on the bus
#[allow(async_fn_in_trait)]
pub trait FrameSink {
    /// Transmit `data` under arbitration id `id`. Must not retry.
    async fn send(&mut self, id: u16, data: &[u8]) -> Result<(), BusError>;
}

/// Frames to the same node and register share a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    dest: u8,
    cmd: Command,
    val: Value,
}

impl From<&CanFrame> for SlotKey {
    fn from(frame: &CanFrame) -> Self {
        Self {
            dest: frame.header.dest,
            cmd: frame.cmd,
            val: frame.val,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<CanFrame>,
    last_sent: Option<Instant>,
}

/// Outcome of one flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub dropped: usize,
}

pub struct BusWriter<S> {
    sink: Option<S>,
    slots: BTreeMap<SlotKey, Slot>,
    min_interval: Duration,
    send_timeout: Duration,
    sink_warned: bool,
}

impl<S: FrameSink> BusWriter<S> {
    /// Writer with the default 100ms interval and 200ms send deadline
    pub fn new(sink: Option<S>) -> Self {
        Self::with_timing(sink, BUS_MIN_INTERVAL, BUS_SEND_TIMEOUT)
    }

    pub fn with_timing(sink: Option<S>, min_interval: Duration, send_timeout: Duration) -> Self {
        if sink.is_none() {
            warn!("No bus sink, motor commands will be discarded");
        }
        Self {
            sink,
            slots: BTreeMap::new(),
            min_interval,
            send_timeout,
            sink_warned: false,
        }
    }

    /// Replace whatever is waiting for this node/register with `frame`
    pub fn submit(&mut self, frame: CanFrame) {
        self.slots.entry(SlotKey::from(&frame)).or_default().pending = Some(frame);
    }

    /// Queue one velocity frame per motor of `target`
    ///
    /// Motors without a node id in `platform` are skipped.
    pub fn submit_targets(
        &mut self,
        source: u8,
        target: &MotorTarget,
        platform: &PlatformConfig,
    ) -> Result<(), FrameError> {
        for (motor, speed) in target.iter() {
            let Some(dest) = platform.node_id(motor) else {
                debug!("No node configured for {:?}, skipping", motor);
                continue;
            };
            self.submit(CanFrame::set_velocity(source, dest, speed)?);
        }
        Ok(())
    }

    /// Send every pending frame whose slot is outside its interval.
    ///
    /// Failed or timed-out sends are dropped. Only a closed sink is
    /// returned as an error.
    pub async fn flush(&mut self, now: Instant) -> Result<FlushReport, BusError> {
        let mut report = FlushReport::default();

        for slot in self.slots.values_mut() {
            let due = slot
                .last_sent
                .is_none_or(|at| now.duration_since(at) >= self.min_interval);
            if !due {
                continue;
            }
            let Some(frame) = slot.pending.take() else {
                continue;
            };
            slot.last_sent = Some(now);

            let Some(sink) = self.sink.as_mut() else {
                report.dropped += 1;
                continue;
            };

            let data = frame.encode();
            match timeout(self.send_timeout, sink.send(BUS_MSG_ID, &data)).await {
                Ok(Ok(())) => {
                    debug!("Sent {:?} {:?} to node {}", frame.cmd, frame.val, frame.header.dest);
                    report.sent += 1;
                    if self.sink_warned {
                        info!("Bus sink recovered");
                        self.sink_warned = false;
                    }
                }
                Ok(Err(BusError::Closed)) => return Err(BusError::Closed),
                Ok(Err(e)) => {
                    report.dropped += 1;
                    if !self.sink_warned {
                        warn!("Bus send failed, dropping frame: {}", e);
                        self.sink_warned = true;
                    }
                }
                Err(_) => {
                    report.dropped += 1;
                    if !self.sink_warned {
                        warn!("{}", BusError::Timeout(self.send_timeout));
                        self.sink_warned = true;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Send zero velocity to every motor now, ignoring the interval
    pub async fn stop_all(&mut self, source: u8, platform: &PlatformConfig) {
        info!("Stopping all motors");
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        for (&motor, &dest) in &platform.nodes {
            let frame = match CanFrame::set_velocity(source, dest, 0.0) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Cannot stop {:?}: {}", motor, e);
                    continue;
                }
            };
            match timeout(self.send_timeout, sink.send(BUS_MSG_ID, &frame.encode())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to stop {:?}: {}", motor, e),
                Err(_) => warn!("Timed out stopping {:?}", motor),
            }
        }
        self.slots.clear();
    }
}
