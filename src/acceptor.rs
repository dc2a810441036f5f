/* Peer-issued connection-ID acceptance, active-ID selection, and
   RETIRE_CONNECTION_ID emission. */
use crate::ack::{AckHandler, AckRecorder};
use crate::cid::{CidEntry, InitialRetry, StatelessResetToken, INVALID_SEQ, MAX_CID_LEN};
use crate::common::{Error, FrameType, QuicError, TransportError};
use crate::config::{CommonParam, ConnIdChangeMode, RandomUsage};
use crate::frame::{NewConnectionIdFrame, RetireConnectionIdFrame};
use crate::packet::{self, StatelessReset, Type};

use log::{debug, trace};

use octets::OctetsMut;

use std::collections::{HashMap, VecDeque};

/// A RETIRE_CONNECTION_ID frame awaiting acknowledgement.
#[derive(Debug, Default)]
struct RetireWait {
    seq: i64,
    wait: AckHandler,
}

/// Stores the connection IDs the peer has issued, selects the active
/// destination ID, and retires IDs per the peer's `retire_prior_to` and
/// the local rotation policy.
#[derive(Debug)]
pub struct IdAcceptor {
    change_mode: ConnIdChangeMode,
    use_zero_length: bool,
    max_packet_per_id: u32,
    dstids: HashMap<i64, CidEntry>,
    waitlist: VecDeque<RetireWait>,

    highest_accepted: i64,
    highest_retired: i64,
    active_connid: i64,

    packet_count_since_id_changed: u32,
    packet_per_id: u32,
}

impl Default for IdAcceptor {
    fn default() -> Self {
        IdAcceptor {
            change_mode: ConnIdChangeMode::None,
            use_zero_length: false,
            max_packet_per_id: 0,
            dstids: HashMap::new(),
            waitlist: VecDeque::new(),
            highest_accepted: INVALID_SEQ,
            highest_retired: INVALID_SEQ,
            active_connid: INVALID_SEQ,
            packet_count_since_id_changed: 0,
            packet_per_id: 0,
        }
    }
}

impl IdAcceptor {
    pub fn reset(&mut self, packet_per_id: u32, max_packet_per_id: u32, mode: ConnIdChangeMode) {
        self.dstids.clear();
        self.waitlist.clear();
        self.highest_accepted = INVALID_SEQ;
        self.active_connid = INVALID_SEQ;
        self.highest_retired = INVALID_SEQ;
        self.use_zero_length = false;
        self.packet_count_since_id_changed = 0;
        self.packet_per_id = packet_per_id;
        self.max_packet_per_id = if mode == ConnIdChangeMode::Random && max_packet_per_id == 0 {
            10000
        } else {
            max_packet_per_id
        };
        self.change_mode = mode;
    }

    /// Retires a stored ID, scheduling the RETIRE_CONNECTION_ID frame.
    /// Returns false when the sequence is not stored.
    pub fn retire(&mut self, sequence_number: i64) -> bool {
        if self.dstids.remove(&sequence_number).is_none() {
            return false;
        }
        self.waitlist.push_back(RetireWait {
            seq: sequence_number,
            wait: AckHandler::default(),
        });
        if self.highest_retired < sequence_number {
            self.highest_retired = sequence_number;
        }
        debug!("retired destination connection ID seq {sequence_number}");
        true
    }

    fn retire_under(&mut self, border: i64) {
        if border <= self.highest_retired {
            return;
        }
        for seq in self.highest_retired + 1..border {
            self.retire(seq);
        }
        self.highest_retired = border - 1;
    }

    fn update_active(&mut self, cparam: &CommonParam) -> Result<(), Error> {
        // a single live ID that is already active stays put
        if self.dstids.len() < 2 && self.dstids.contains_key(&self.active_connid) {
            return Ok(());
        }
        if self.active_connid >= 0 {
            // may already be gone when a retire_prior_to removed it
            self.retire(self.active_connid);
        }
        for seq in self.active_connid + 1..=self.highest_accepted {
            if !self.dstids.contains_key(&seq) {
                continue;
            }
            self.active_connid = seq;
            self.packet_count_since_id_changed = 0;
            if self.change_mode == ConnIdChangeMode::Random {
                let mut draw = [0u8; 4];
                cparam.random.fill(&mut draw, RandomUsage::IdChangeDuration);
                self.packet_per_id = u32::from_be_bytes(draw) % self.max_packet_per_id;
            }
            debug!("active destination connection ID is now seq {seq}");
            return Ok(());
        }
        Err(Error::Transport(QuicError {
            reason: "no connection id available",
            transport_error: TransportError::ProtocolViolation,
            frame_type: FrameType::NewConnectionId,
            packet_type: None,
        }))
    }

    pub fn recv(&mut self, cparam: &CommonParam, frame: &NewConnectionIdFrame) -> Result<(), Error> {
        self.accept(
            cparam,
            frame.sequence_number as i64,
            frame.retire_prior_to as i64,
            frame.connection_id.as_ref(),
            &frame.stateless_reset_token,
        )
    }

    /// Validates and stores a peer-issued connection ID.
    pub fn accept(
        &mut self,
        cparam: &CommonParam,
        sequence_number: i64,
        retire_prior_to: i64,
        connection_id: &[u8],
        reset_token: &StatelessResetToken,
    ) -> Result<(), Error> {
        if self.use_zero_length {
            return Err(Error::Transport(QuicError {
                reason: "received NEW_CONNECTION_ID while using zero-length connection ID",
                transport_error: TransportError::ConnectionIdLimitError,
                frame_type: FrameType::NewConnectionId,
                packet_type: None,
            }));
        }

        if sequence_number < self.active_connid || sequence_number < self.highest_retired {
            // a stale frame; retire the ID without storing it
            trace!("stale connection ID seq {sequence_number}, retiring");
            self.retire(sequence_number);
            return Ok(());
        }

        if cparam.version == packet::VERSION_1
            && (connection_id.is_empty() || connection_id.len() > MAX_CID_LEN)
        {
            return Err(Error::Transport(QuicError {
                reason: "invalid connection ID length for QUIC version 1",
                transport_error: TransportError::FrameEncodingError,
                frame_type: FrameType::NewConnectionId,
                packet_type: Some(Type::OneRTT),
            }));
        }

        if retire_prior_to > sequence_number {
            return Err(Error::Transport(QuicError {
                reason: "retire_prior_to is higher than sequence_number",
                transport_error: TransportError::ProtocolViolation,
                frame_type: FrameType::NewConnectionId,
                packet_type: None,
            }));
        }

        self.retire_under(retire_prior_to);

        match self.dstids.get(&sequence_number) {
            None => {
                self.dstids.insert(
                    sequence_number,
                    CidEntry::new(sequence_number, connection_id.to_vec(), *reset_token),
                );
                debug!("accepted destination connection ID seq {sequence_number}");
            }
            Some(existing) => {
                if existing.id.as_ref() != connection_id {
                    return Err(Error::Transport(QuicError {
                        reason: "different connection ID on same sequence number",
                        transport_error: TransportError::ProtocolViolation,
                        frame_type: FrameType::NewConnectionId,
                        packet_type: None,
                    }));
                }
                if existing.reset_token != *reset_token {
                    return Err(Error::Transport(QuicError {
                        reason: "different stateless reset token on same sequence number",
                        transport_error: TransportError::ProtocolViolation,
                        frame_type: FrameType::NewConnectionId,
                        packet_type: None,
                    }));
                }
            }
        }

        if sequence_number > self.highest_accepted {
            self.highest_accepted = sequence_number;
        }

        if self.active_connid < retire_prior_to {
            self.update_active(cparam)?;
        }

        Ok(())
    }

    /// Rotates the active ID: always away from the handshake-time ID once
    /// the handshake is confirmed, and thereafter per the change-mode
    /// packet-count policy while enough spare IDs exist.
    pub fn maybe_update_id(
        &mut self,
        cparam: &CommonParam,
        handshake_confirmed: bool,
        local_max_active_conn: u64,
    ) -> Result<(), Error> {
        if !handshake_confirmed {
            return Ok(());
        }
        if (!self.dstids.is_empty() && self.active_connid == 0)
            || (self.change_mode != ConnIdChangeMode::None
                && (self.dstids.len() as u64) * 2 >= local_max_active_conn
                && self.packet_count_since_id_changed >= self.packet_per_id)
        {
            return self.update_active(cparam);
        }
        Ok(())
    }

    /// The handshake's `stateless_reset_token` transport parameter binds a
    /// token to the ID with sequence 0 after the fact.
    pub fn on_initial_stateless_reset_token_received(&mut self, token: &StatelessResetToken) {
        if let Some(entry) = self.dstids.get_mut(&0) {
            entry.reset_token = *token;
        }
    }

    /// A preferred address delivers one extra ID at sequence 1.
    pub fn on_preferred_address_received(
        &mut self,
        cparam: &CommonParam,
        connection_id: &[u8],
        reset_token: &StatelessResetToken,
    ) -> Result<(), Error> {
        self.accept(cparam, 1, -1, connection_id, reset_token)
    }

    pub fn on_zero_length_acception(&mut self) {
        self.use_zero_length = true;
    }

    pub fn is_using_zero_length(&self) -> bool {
        self.use_zero_length
    }

    /// True once a destination ID (possibly zero-length) is usable.
    pub fn initial_conn_id_accepted(&self) -> bool {
        self.use_zero_length || self.active_connid >= 0
    }

    pub fn on_packet_sent(&mut self) {
        self.packet_count_since_id_changed = self.packet_count_since_id_changed.saturating_add(1);
    }

    pub fn choose(&self, sequence_number: i64) -> Option<&CidEntry> {
        self.dstids.get(&sequence_number)
    }

    pub fn active_connid(&self) -> i64 {
        self.active_connid
    }

    pub fn highest_accepted(&self) -> i64 {
        self.highest_accepted
    }

    pub fn highest_retired(&self) -> i64 {
        self.highest_retired
    }

    /// The destination ID to put on outgoing packets. Before the peer has
    /// issued any ID, falls back to the initial/Retry destination.
    pub fn pick_up_id<'a>(&'a self, initial_retry: Option<&'a InitialRetry>) -> Option<&'a [u8]> {
        if self.use_zero_length {
            return Some(&[]);
        }
        if self.active_connid < 0 {
            return initial_retry.map(|ir| ir.initial_or_retry());
        }
        self.dstids
            .get(&self.active_connid)
            .map(|entry| entry.id.as_ref())
    }

    pub fn has_id(&self, cmp: &[u8]) -> bool {
        if self.use_zero_length {
            return cmp.is_empty();
        }
        self.dstids.values().any(|entry| entry.id.as_ref() == cmp)
    }

    /// True iff the datagram's trailing token matches the reset token
    /// bound to the currently active destination ID.
    pub fn is_stateless_reset(&self, reset: &StatelessReset) -> bool {
        if self.active_connid < 0 {
            return false;
        }
        let Some(current) = self.dstids.get(&self.active_connid) else {
            return false;
        };
        if current.reset_token.is_null() {
            return false;
        }
        reset.stateless_reset_token == current.reset_token
    }

    /// Writes pending RETIRE_CONNECTION_ID frames into `fw`, following
    /// the acked/lost/unsent discipline of the waitlist.
    pub fn send(&mut self, fw: &mut OctetsMut, observer: &mut AckRecorder) -> Result<(), Error> {
        let mut i = 0;
        while i < self.waitlist.len() {
            let wait = &mut self.waitlist[i];
            if wait.wait.not_confirmed() {
                if wait.wait.is_ack() {
                    wait.wait.confirm();
                    self.waitlist.remove(i);
                    continue;
                }
                if !wait.wait.is_lost() {
                    i += 1;
                    continue;
                }
            }

            let frame = RetireConnectionIdFrame {
                sequence_number: wait.seq as u64,
            };
            if fw.cap() < frame.wire_len() {
                // wait next chance
                i += 1;
                continue;
            }
            frame.render(fw)?;
            wait.wait.wait(observer);
            i += 1;
        }
        Ok(())
    }
}
