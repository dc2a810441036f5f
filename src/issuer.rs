/* Local connection-ID issuance: generation, NEW_CONNECTION_ID emission,
   and peer-driven retirement. */
use crate::ack::{AckHandler, AckRecorder};
use crate::cid::{CidEntry, CidExporter, RandomExporter, StatelessResetToken, INVALID_SEQ};
use crate::common::{Error, FrameType, QuicError, TransportError};
use crate::config::CommonParam;
use crate::frame::{NewConnectionIdFrame, RetireConnectionIdFrame};

use log::{debug, trace};

use octets::OctetsMut;

use std::collections::{HashMap, VecDeque};

/// active_connection_id_limit before the peer's transport parameters
/// arrive (RFC 9000 18.2).
const DEFAULT_MAX_ACTIVE_CONN_ID: u64 = 2;

/// A NEW_CONNECTION_ID frame awaiting acknowledgement.
#[derive(Debug, Default)]
struct IdWait {
    seq: i64,
    retire_prior_to: i64,
    wait: AckHandler,
}

/// Issues local connection IDs, publishes them as NEW_CONNECTION_ID
/// frames, and honors the peer's RETIRE_CONNECTION_ID frames under its
/// `active_connection_id_limit`.
pub struct IdIssuer {
    issued_seq: i64,
    current_seq: i64,
    srcids: HashMap<i64, CidEntry>,
    waitlist: VecDeque<IdWait>,
    max_active_conn_id: u64,
    connid_len: u8,
    concurrent_limit: u8,
    exporter: Box<dyn CidExporter>,
    retire_prior_to_id: i64,
}

impl Default for IdIssuer {
    fn default() -> Self {
        IdIssuer {
            issued_seq: INVALID_SEQ,
            current_seq: INVALID_SEQ,
            srcids: HashMap::new(),
            waitlist: VecDeque::new(),
            max_active_conn_id: DEFAULT_MAX_ACTIVE_CONN_ID,
            connid_len: 0,
            concurrent_limit: 0,
            exporter: Box::new(RandomExporter),
            retire_prior_to_id: 0,
        }
    }
}

impl IdIssuer {
    pub fn reset(&mut self, exporter: Box<dyn CidExporter>, connid_len: u8, concurrent_limit: u8) {
        self.srcids.clear();
        self.waitlist.clear();
        self.max_active_conn_id = DEFAULT_MAX_ACTIVE_CONN_ID;
        self.issued_seq = INVALID_SEQ;
        self.current_seq = INVALID_SEQ;
        self.connid_len = connid_len;
        self.concurrent_limit = concurrent_limit;
        self.exporter = exporter;
        self.retire_prior_to_id = 0;
    }

    pub fn on_transport_parameter_received(&mut self, active_conn_id_limit: u64) {
        self.max_active_conn_id = active_conn_id_limit;
    }

    pub fn is_using_zero_length(&self) -> bool {
        self.connid_len == 0
    }

    pub fn connid_len(&self) -> u8 {
        self.connid_len
    }

    /// Issues a fresh connection ID, returning it together with the
    /// `retire_prior_to` value the announcing frame should carry. With
    /// `enqueue_wait` the frame is scheduled through [`IdIssuer::send`].
    pub fn issue(
        &mut self,
        cparam: &CommonParam,
        enqueue_wait: bool,
    ) -> Result<(CidEntry, i64), Error> {
        if self.is_using_zero_length() {
            return Err(Error::ConnId("using zero length"));
        }
        if !cparam.random.is_valid() {
            return Err(Error::UserArg("invalid random"));
        }

        // at the peer's limit, every further issuance asks the peer to
        // retire everything below the current ID
        let mut retire_prior_to = 0;
        if self.srcids.len() as u64 >= self.max_active_conn_id {
            self.retire_prior_to_id = self.current_seq + 1;
            retire_prior_to = self.current_seq;
        }

        let mut id = vec![0u8; self.connid_len as usize];
        let mut token = [0u8; 16];
        self.exporter
            .generate(&cparam.random, cparam.version, &mut id, &mut token)?;

        let seq = self.issued_seq + 1;
        if self.srcids.contains_key(&seq) {
            return Err(Error::Bug("sequence collision on issuance"));
        }
        self.issued_seq = seq;
        if self.issued_seq == 0 {
            // on initial issue, use the connection ID with sequence 0
            self.current_seq = 0;
        }

        let entry = CidEntry::new(seq, id, StatelessResetToken::new(token));
        self.srcids.insert(seq, entry.clone());

        if enqueue_wait {
            self.waitlist.push_back(IdWait {
                seq,
                retire_prior_to,
                wait: AckHandler::default(),
            });
        }

        self.exporter.add(entry.id.as_ref(), &entry.reset_token);
        debug!("issued connection ID seq {seq} (retire_prior_to {retire_prior_to})");
        Ok((entry, retire_prior_to))
    }

    /// Issues IDs until the smaller of the peer's limit and the local
    /// concurrency cap is reached.
    pub fn issue_ids_to_max_connid_limit(&mut self, cparam: &CommonParam) -> Result<(), Error> {
        let to_issue = self.max_active_conn_id.min(u64::from(self.concurrent_limit));
        while (self.srcids.len() as u64) < to_issue {
            self.issue(cparam, true)?;
        }
        Ok(())
    }

    fn update_current_id(&mut self) -> Result<(), Error> {
        self.current_seq = self.srcids.keys().min().copied().unwrap_or(INVALID_SEQ);
        if self.current_seq < 0 {
            return Err(Error::Bug("retire connection ID without new connection ID"));
        }
        Ok(())
    }

    /// Handles a RETIRE_CONNECTION_ID frame. `recv_dest_id` is the
    /// destination connection ID of the packet that carried the frame; a
    /// peer cannot retire the ID it is currently sending on.
    pub fn retire(
        &mut self,
        cparam: &CommonParam,
        recv_dest_id: &[u8],
        frame: &RetireConnectionIdFrame,
    ) -> Result<(), Error> {
        if self.is_using_zero_length() {
            return Err(Error::Transport(QuicError {
                reason: "received RETIRE_CONNECTION_ID while using zero-length connection ID",
                transport_error: TransportError::ConnectionIdLimitError,
                frame_type: FrameType::RetireConnectionId,
                packet_type: None,
            }));
        }

        let seq = frame.sequence_number as i64;
        if seq > self.issued_seq {
            return Err(Error::Transport(QuicError {
                reason: "retiring a connection ID sequence that was never issued",
                transport_error: TransportError::ProtocolViolation,
                frame_type: FrameType::RetireConnectionId,
                packet_type: None,
            }));
        }

        match self.srcids.get(&seq) {
            None => {
                trace!("connection ID seq {seq} already retired");
                return Ok(());
            }
            Some(entry) => {
                if entry.id.as_ref() == recv_dest_id {
                    return Err(Error::Transport(QuicError {
                        reason: "retiring the connection ID the frame itself was sent on",
                        transport_error: TransportError::ProtocolViolation,
                        frame_type: FrameType::RetireConnectionId,
                        packet_type: None,
                    }));
                }
            }
        }

        let entry = self
            .srcids
            .remove(&seq)
            .ok_or(Error::Bug("failed to delete connection ID"))?;
        self.exporter.retire(entry.id.as_ref(), &entry.reset_token);
        debug!("retired connection ID seq {seq}");

        if entry.seq != 0 {
            self.issue(cparam, true)?;
        }

        if self.current_seq == seq {
            return self.update_current_id();
        }

        Ok(())
    }

    /// Writes pending NEW_CONNECTION_ID frames into `fw`, following the
    /// acked/lost/unsent discipline of the waitlist. Frames that do not
    /// fit stay queued for the next opportunity.
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

            let Some(entry) = self.srcids.get(&wait.seq) else {
                // already retired
                self.waitlist.remove(i);
                continue;
            };

            let frame = NewConnectionIdFrame {
                sequence_number: wait.seq as u64,
                retire_prior_to: wait.retire_prior_to as u64,
                connection_id: entry.id.clone(),
                stateless_reset_token: entry.reset_token,
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

    /// Looks up an issued connection ID by sequence number.
    pub fn choose(&self, sequence_number: i64) -> Option<&CidEntry> {
        self.srcids.get(&sequence_number)
    }

    pub fn has_id(&self, cmp: &[u8]) -> bool {
        self.srcids.values().any(|entry| entry.id.as_ref() == cmp)
    }

    /// The ID the endpoint currently advertises about itself.
    pub fn pick_up_id(&self) -> Option<&[u8]> {
        if self.current_seq < 0 {
            return None;
        }
        self.srcids
            .get(&self.current_seq)
            .map(|entry| entry.id.as_ref())
    }

    /// Resolves the destination connection ID length of a short header
    /// packet from the bytes following its first byte, by matching the
    /// locally issued IDs. This is the callback 1-RTT parsing needs.
    pub fn one_rtt_dst_len(&self, payload: &[u8]) -> Option<usize> {
        if self.is_using_zero_length() {
            return Some(0);
        }
        self.srcids
            .values()
            .find_map(|entry| entry.id.is_prefix_of(payload).then_some(entry.id.len()))
    }

    /// Hands every live ID to the caller for demultiplexer cleanup when
    /// the connection dies. The issuer is empty afterwards.
    pub fn drain_close_ids(&mut self) -> Vec<CidEntry> {
        self.current_seq = INVALID_SEQ;
        self.waitlist.clear();
        self.srcids.drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Random;

    use octets::Octets;

    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU8, Ordering};

    fn counting_random() -> Random {
        let counter = AtomicU8::new(0);
        Random::new(move |buf, _| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            buf.fill(n);
            true
        })
    }

    fn cparam() -> CommonParam {
        CommonParam {
            random: counting_random(),
            version: 1,
        }
    }

    fn issuer(connid_len: u8, concurrent_limit: u8) -> IdIssuer {
        let mut issuer = IdIssuer::default();
        issuer.reset(Box::new(RandomExporter), connid_len, concurrent_limit);
        issuer
    }

    #[derive(Default)]
    struct RecordingExporter {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl CidExporter for RecordingExporter {
        fn generate(
            &mut self,
            random: &Random,
            version: u32,
            id: &mut [u8],
            token: &mut [u8; 16],
        ) -> Result<(), Error> {
            RandomExporter.generate(random, version, id, token)
        }

        fn add(&mut self, id: &[u8], _token: &StatelessResetToken) {
            self.events.borrow_mut().push(format!("add {id:02x?}"));
        }

        fn retire(&mut self, id: &[u8], _token: &StatelessResetToken) {
            self.events.borrow_mut().push(format!("retire {id:02x?}"));
        }
    }

    #[test]
    fn issue_to_limit_before_transport_params() {
        let cparam = cparam();
        let mut issuer = issuer(4, 8);

        // the default limit of two applies until the peer's parameters
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();
        assert!(issuer.choose(0).is_some());
        assert!(issuer.choose(1).is_some());
        assert!(issuer.choose(2).is_none());

        issuer.on_transport_parameter_received(4);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();
        for seq in 0..4 {
            assert_eq!(issuer.choose(seq).unwrap().seq, seq);
        }
        assert!(issuer.choose(4).is_none());
    }

    #[test]
    fn concurrent_limit_caps_issuance() {
        let cparam = cparam();
        let mut issuer = issuer(4, 3);
        issuer.on_transport_parameter_received(8);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();
        assert!(issuer.choose(2).is_some());
        assert!(issuer.choose(3).is_none());
    }

    #[test]
    fn issue_failures() {
        let cparam = cparam();
        let mut zero_len = issuer(0, 4);
        assert_eq!(
            zero_len.issue(&cparam, false).unwrap_err(),
            Error::ConnId("using zero length")
        );

        let mut no_random = issuer(4, 4);
        let invalid = CommonParam {
            random: Random::default(),
            version: 1,
        };
        assert_eq!(
            no_random.issue(&invalid, false).unwrap_err(),
            Error::UserArg("invalid random")
        );
    }

    #[test]
    fn issuance_past_limit_forces_retirement() {
        let cparam = cparam();
        let mut issuer = issuer(4, 2);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();

        // the map is at the limit; the next issuance proposes retirement
        // of everything below the current ID
        let (entry, retire_prior_to) = issuer.issue(&cparam, false).unwrap();
        assert_eq!(entry.seq, 2);
        assert_eq!(retire_prior_to, 0);
    }

    #[test]
    fn retire_replaces_and_reelects_minimum() {
        let cparam = cparam();
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut issuer = IdIssuer::default();
        issuer.reset(
            Box::new(RecordingExporter {
                events: events.clone(),
            }),
            4,
            4,
        );
        issuer.on_transport_parameter_received(4);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();
        assert_eq!(issuer.pick_up_id(), Some(&[0u8; 4][..]));

        // retiring a non-zero sequence issues a replacement
        let not_in_use = [0xffu8; 4];
        issuer
            .retire(
                &cparam,
                &not_in_use,
                &RetireConnectionIdFrame { sequence_number: 1 },
            )
            .unwrap();
        assert!(issuer.choose(1).is_none());
        assert_eq!(issuer.choose(4).unwrap().seq, 4);
        assert!(events.borrow().iter().any(|e| e.starts_with("retire")));

        // retiring sequence 0 issues no replacement and re-elects the
        // minimum remaining sequence
        issuer
            .retire(
                &cparam,
                &not_in_use,
                &RetireConnectionIdFrame { sequence_number: 0 },
            )
            .unwrap();
        assert!(issuer.choose(0).is_none());
        let current = issuer.pick_up_id().unwrap().to_vec();
        assert_eq!(current, issuer.choose(2).unwrap().id.as_ref());
    }

    #[test]
    fn retire_rejections() {
        let cparam = cparam();
        let mut issuer = issuer(4, 2);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();

        // a sequence that was never issued
        let err = issuer
            .retire(
                &cparam,
                &[],
                &RetireConnectionIdFrame {
                    sequence_number: 99,
                },
            )
            .unwrap_err();
        match err {
            Error::Transport(e) => {
                assert_eq!(e.transport_error, TransportError::ProtocolViolation);
                assert_eq!(e.frame_type, FrameType::RetireConnectionId);
            }
            other => panic!("unexpected error {other:?}"),
        }

        // the ID the frame itself arrived on
        let in_use = issuer.choose(0).unwrap().id.clone();
        let err = issuer
            .retire(
                &cparam,
                in_use.as_ref(),
                &RetireConnectionIdFrame { sequence_number: 0 },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        // an already retired sequence succeeds silently
        issuer
            .retire(
                &cparam,
                &[],
                &RetireConnectionIdFrame { sequence_number: 1 },
            )
            .unwrap();
        issuer
            .retire(
                &cparam,
                &[],
                &RetireConnectionIdFrame { sequence_number: 1 },
            )
            .unwrap();

        // zero-length mode rejects the frame outright
        let mut zero_len = IdIssuer::default();
        zero_len.reset(Box::new(RandomExporter), 0, 4);
        let err = zero_len
            .retire(
                &cparam,
                &[],
                &RetireConnectionIdFrame { sequence_number: 0 },
            )
            .unwrap_err();
        match err {
            Error::Transport(e) => {
                assert_eq!(e.transport_error, TransportError::ConnectionIdLimitError)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn send_tracks_ack_and_loss() {
        let cparam = cparam();
        let mut issuer = issuer(4, 2);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();

        let mut observer = AckRecorder::new();
        let mut buf = [0u8; 256];
        let written = {
            let mut fw = OctetsMut::with_slice(&mut buf);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };

        // both pending IDs went out as NEW_CONNECTION_ID frames
        let mut r = Octets::with_slice(&buf[..written]);
        let first = NewConnectionIdFrame::parse(&mut r).unwrap();
        let second = NewConnectionIdFrame::parse(&mut r).unwrap();
        assert_eq!(first.sequence_number, 0);
        assert_eq!(first.retire_prior_to, 0);
        assert_eq!(second.sequence_number, 1);
        assert!(r.is_empty());

        // still waiting: a second opportunity writes nothing
        let record = observer.take().unwrap();
        let mut buf2 = [0u8; 256];
        let written = {
            let mut fw = OctetsMut::with_slice(&mut buf2);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };
        assert_eq!(written, 0);

        // a loss re-renders both frames with a fresh cell
        record.lost();
        let written = {
            let mut fw = OctetsMut::with_slice(&mut buf2);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };
        assert!(written > 0);

        // acknowledgement clears the waitlist
        observer.take().unwrap().ack();
        let mut buf3 = [0u8; 256];
        let written = {
            let mut fw = OctetsMut::with_slice(&mut buf3);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };
        assert_eq!(written, 0);

        // and nothing is left queued
        let written = {
            let mut fw = OctetsMut::with_slice(&mut buf3);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };
        assert_eq!(written, 0);
    }

    #[test]
    fn send_skips_frames_that_do_not_fit() {
        let cparam = cparam();
        let mut issuer = issuer(4, 2);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();

        let mut observer = AckRecorder::new();
        let mut tiny = [0u8; 4];
        let written = {
            let mut fw = OctetsMut::with_slice(&mut tiny);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };
        assert_eq!(written, 0);

        // the frames are still pending and go out later
        let mut buf = [0u8; 256];
        let written = {
            let mut fw = OctetsMut::with_slice(&mut buf);
            issuer.send(&mut fw, &mut observer).unwrap();
            fw.off()
        };
        assert!(written > 0);
    }

    #[test]
    fn one_rtt_dst_len_matches_local_ids() {
        let cparam = cparam();
        let mut issuer = issuer(4, 2);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();

        let id = issuer.choose(1).unwrap().id.clone();
        let mut payload = id.as_ref().to_vec();
        payload.extend_from_slice(b"rest of packet");
        assert_eq!(issuer.one_rtt_dst_len(&payload), Some(4));
        assert!(issuer.has_id(id.as_ref()));

        assert_eq!(issuer.one_rtt_dst_len(b"unknown prefix.."), None);

        let zero_len = IdIssuer::default();
        assert_eq!(zero_len.one_rtt_dst_len(b"anything"), Some(0));
    }

    #[test]
    fn drain_close_ids_empties_the_issuer() {
        let cparam = cparam();
        let mut issuer = issuer(4, 2);
        issuer.issue_ids_to_max_connid_limit(&cparam).unwrap();

        let ids = issuer.drain_close_ids();
        assert_eq!(ids.len(), 2);
        assert!(issuer.pick_up_id().is_none());
        assert!(issuer.choose(0).is_none());
    }
}
