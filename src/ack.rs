/* Shared ACK/loss outcome cells and the send-side resend handler. */
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const STATE_WAIT: u8 = 0;
const STATE_ACK: u8 = 1;
const STATE_LOST: u8 = 2;

/// Records the fate of one transmission. Created by the sender, marked by
/// the ACK/loss observer, read by the sender.
///
/// The observer is the only writer and each cell is marked at most once,
/// so plain relaxed loads are enough; a reader eventually observes the
/// terminal state and the state never leaves it while the cell is held.
#[derive(Debug)]
pub struct AckLostRecord {
    state: AtomicU8,
}

impl AckLostRecord {
    pub fn new() -> Self {
        AckLostRecord {
            state: AtomicU8::new(STATE_WAIT),
        }
    }

    pub fn wait(&self) {
        self.state.store(STATE_WAIT, Ordering::Relaxed);
    }

    pub fn ack(&self) {
        self.state.store(STATE_ACK, Ordering::Relaxed);
    }

    pub fn lost(&self) {
        self.state.store(STATE_LOST, Ordering::Relaxed);
    }

    pub fn is_ack(&self) -> bool {
        self.state.load(Ordering::Relaxed) == STATE_ACK
    }

    pub fn is_lost(&self) -> bool {
        self.state.load(Ordering::Relaxed) == STATE_LOST
    }
}

impl Default for AckLostRecord {
    fn default() -> Self {
        AckLostRecord::new()
    }
}

/// Allocates a fresh cell in the waiting state.
pub fn make_ack_wait() -> Arc<AckLostRecord> {
    Arc::new(AckLostRecord::new())
}

/// Observer-side marker. The observer holds only a weak reference; a
/// sender that already confirmed or reset drops the cell and the mark
/// becomes a no-op.
pub fn mark_as_ack(rec: &Weak<AckLostRecord>) {
    if let Some(r) = rec.upgrade() {
        r.ack();
    }
}

pub fn mark_as_lost(rec: &Weak<AckLostRecord>) {
    if let Some(r) = rec.upgrade() {
        r.lost();
    }
}

/// Hands out the cell for the packet currently being built. The first
/// `record` call after a `take` creates a new cell; every later call in
/// the same round returns the same one, so all frames in one packet share
/// a single outcome.
#[derive(Debug, Default)]
pub struct AckRecorder {
    rec: Option<Arc<AckLostRecord>>,
}

impl AckRecorder {
    pub fn new() -> Self {
        AckRecorder { rec: None }
    }

    pub fn record(&mut self) -> Arc<AckLostRecord> {
        self.rec.get_or_insert_with(make_ack_wait).clone()
    }

    pub fn get(&self) -> Option<&Arc<AckLostRecord>> {
        self.rec.as_ref()
    }

    /// Detaches the current cell for handoff to the observer.
    pub fn take(&mut self) -> Option<Arc<AckLostRecord>> {
        self.rec.take()
    }
}

/// One-slot holder tying a resendable frame to its outcome cell.
#[derive(Debug, Default)]
pub struct AckHandler {
    record: Option<Arc<AckLostRecord>>,
}

impl AckHandler {
    pub fn reset(&mut self) {
        self.record = None;
    }

    pub fn is_ack(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.is_ack())
    }

    pub fn is_lost(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.is_lost())
    }

    /// True while an outcome is still being tracked.
    pub fn not_confirmed(&self) -> bool {
        self.record.is_some()
    }

    /// Releases the cell once its outcome has been consumed.
    pub fn confirm(&mut self) {
        self.record = None;
    }

    /// Binds the cell of the packet being built, replacing any prior one.
    pub fn wait(&mut self, rec: &mut AckRecorder) {
        self.record = Some(rec.record());
    }
}
