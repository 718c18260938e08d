// Controller input: packet decoding and the latest-value mailbox
//
// The packet task writes, the control loop reads. Only the newest snapshot
// matters, so the mailbox is a `watch` channel rather than a queue.

pub mod dabble;

use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, warn};

pub use dabble::{decode, DecodeError, ExtraButton, InputState, JoystickButton, PadMode};

/// A value plus the instant it was published
#[derive(Debug, Clone, Copy)]
pub struct Stamped<T> {
    pub value: T,
    pub at: Instant,
}

/// Writer half of a single-slot mailbox
pub struct SlotWriter<T> {
    tx: watch::Sender<Option<Stamped<T>>>,
}

/// Reader half of a single-slot mailbox
#[derive(Clone)]
pub struct SlotReader<T> {
    rx: watch::Receiver<Option<Stamped<T>>>,
}

/// Create an empty mailbox
pub fn slot<T: Clone>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = watch::channel(None);
    (SlotWriter { tx }, SlotReader { rx })
}

impl<T: Clone> SlotWriter<T> {
    /// Replace the held value. Never blocks, never fails if readers are gone.
    pub fn publish(&self, value: T, at: Instant) {
        self.tx.send_replace(Some(Stamped { value, at }));
    }

    /// Latest value, if any (the packet task decodes on top of it)
    pub fn current(&self) -> Option<T> {
        self.tx.borrow().as_ref().map(|s| s.value.clone())
    }
}

impl<T: Clone> SlotReader<T> {
    /// Latest value with its timestamp, without waiting
    pub fn latest(&self) -> Option<Stamped<T>> {
        self.rx.borrow().clone()
    }
}

/// Decode one raw packet into the input mailbox.
///
/// Bad packets are dropped; the previous snapshot stays published.
pub fn on_packet(writer: &SlotWriter<InputState>, packet: &[u8], now: Instant) {
    let previous = writer.current().unwrap_or_default();
    match previous.apply(packet) {
        Ok(state) => {
            debug!("Decoded input: {:?}", state);
            writer.publish(state, now);
        }
        Err(e) => warn!("Dropping controller packet: {}", e),
    }
}
