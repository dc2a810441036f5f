/* Path MTU discovery: a binary-search probe engine driven by probe
   ACK/loss outcomes (DPLPMTUD, RFC 8899 applied to QUIC). */
use crate::ack::{AckHandler, AckRecorder};
use crate::config::MtuConfig;

use log::{debug, trace};

/// Smallest IP packet size any QUIC path must carry.
pub const LEAST_IP_PACKET_SIZE: u64 = 1280;

/// Smallest UDP datagram size a QUIC endpoint may assume.
pub const INITIAL_UDP_DATAGRAM_SIZE: u64 = 1200;

/// True when a datagram limit is too small to run QUIC at all.
pub fn path_rejects_quic(datagram_limit: u64) -> bool {
    datagram_limit < INITIAL_UDP_DATAGRAM_SIZE
}

/// Discovery engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disabled,
    Base,
    Searching,
    Error,
    SearchComplete,
}

/// Binary search over candidate payload sizes.
///
/// After the window closes to within `accuracy`, one extra probe at the
/// upper bound is issued before `complete()` turns true; that catches the
/// common case that the peer supports exactly `high`.
#[derive(Clone, Copy, Debug)]
pub struct BinarySearcher {
    high: u64,
    mid: u64,
    low: u64,
    accuracy: u64,
    high_updated: bool,
}

impl BinarySearcher {
    pub fn new() -> Self {
        BinarySearcher {
            high: 0,
            mid: 0,
            low: 0,
            accuracy: 1,
            high_updated: false,
        }
    }

    fn internal_complete(&self) -> bool {
        self.high - self.low <= self.accuracy
    }

    fn update_next(&mut self) {
        if self.internal_complete() && !self.high_updated {
            if self.mid != self.high {
                self.mid = self.high;
                return;
            }
            self.high_updated = true;
            return;
        }
        self.mid = self.low + ((self.high - self.low) >> 1);
    }

    pub fn reset(&mut self) {
        *self = BinarySearcher::new();
    }

    /// Sets the search window. Fails when `low > high`.
    pub fn set(&mut self, low: u64, high: u64, accuracy: u64) -> bool {
        if low > high {
            return false;
        }
        self.low = low;
        self.high = high;
        self.accuracy = accuracy;
        self.high_updated = false;
        self.update_next();
        true
    }

    pub fn complete(&self) -> bool {
        self.internal_complete() && self.high_updated
    }

    /// The next size to probe.
    pub fn get_next(&self) -> u64 {
        self.mid
    }

    pub fn on_ack(&mut self) {
        self.low = self.mid;
        self.update_next();
    }

    pub fn on_lost(&mut self) {
        self.high = self.mid;
        self.high_updated = true;
        self.update_next();
    }
}

impl Default for BinarySearcher {
    fn default() -> Self {
        BinarySearcher::new()
    }
}

/// The per-path MTU engine. Probes are regular packets padded to the
/// candidate size; the ACK/loss observer reports their fate through the
/// bound record.
#[derive(Debug, Default)]
pub struct Mtu {
    state: State,
    config: MtuConfig,
    current_payload_size: u64,
    probe_count: u64,
    search: BinarySearcher,
    wait: AckHandler,
    transport_param_value: u64,
    transport_param_set: bool,
}

impl Default for State {
    fn default() -> Self {
        State::Disabled
    }
}

impl Mtu {
    pub fn reset(&mut self, config: MtuConfig) {
        self.config = config;
        if path_rejects_quic(self.config.base_plpmtu) {
            self.config.base_plpmtu = INITIAL_UDP_DATAGRAM_SIZE;
        }
        if path_rejects_quic(self.config.min_plpmtu) {
            self.config.min_plpmtu = INITIAL_UDP_DATAGRAM_SIZE;
        }
        if path_rejects_quic(self.config.max_plpmtu) {
            self.config.max_plpmtu = INITIAL_UDP_DATAGRAM_SIZE;
        }
        self.current_payload_size = self.config.base_plpmtu;
        self.state = State::Disabled;
        self.probe_count = 0;
        self.transport_param_value = 0;
        self.transport_param_set = false;
        self.wait.reset();
        self.search.reset();
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Records the peer's `max_udp_payload_size`. Rejects values below
    /// the QUIC minimum.
    pub fn on_transport_parameter_received(&mut self, value: u64) -> bool {
        if path_rejects_quic(value) {
            return false;
        }
        self.transport_param_value = value;
        self.transport_param_set = true;
        true
    }

    fn on_searching(&mut self) {
        self.state = State::Searching;
        let max_mtu = self.transport_param_value.min(self.config.max_plpmtu);
        self.search.set(self.config.base_plpmtu, max_mtu, 1);
        debug!(
            "PMTU search started: {}..{}",
            self.config.base_plpmtu, max_mtu
        );
    }

    pub fn on_handshake_confirmed(&mut self) {
        self.on_searching();
    }

    pub fn on_path_migrated(&mut self) {
        self.on_searching();
    }

    /// Decides whether a probe should be sent now and at what payload
    /// size, consuming the previous probe's outcome first. A lost probe
    /// is retried up to `max_probes` times before the size is declared
    /// unreachable.
    pub fn probe_required(&mut self, observer: &mut AckRecorder) -> Option<u64> {
        if self.state != State::Searching {
            return None;
        }

        if self.wait.not_confirmed() {
            if self.wait.is_lost() {
                self.probe_count += 1;
                trace!(
                    "PMTU probe {} lost ({}/{})",
                    self.search.get_next(),
                    self.probe_count,
                    self.config.max_probes
                );
                if self.probe_count == self.config.max_probes {
                    self.search.on_lost();
                    self.probe_count = 0;
                }
            } else if self.wait.is_ack() {
                self.wait.confirm();
                self.current_payload_size = self.search.get_next();
                debug!("PMTU probe acked, payload size {}", self.current_payload_size);
                self.search.on_ack();
            } else {
                // waiting now
                return None;
            }
        }

        if self.search.complete() {
            self.wait.confirm();
            self.state = State::SearchComplete;
            debug!("PMTU search complete at {}", self.current_payload_size);
            return None;
        }

        self.wait.wait(observer);
        Some(self.search.get_next())
    }

    /// The datagram size outgoing packets may use on this path.
    pub fn current_datagram_size(&self) -> u64 {
        self.current_payload_size
    }
}
