/* Connection-ID storage types shared by the issuer and acceptor. */
use crate::common::Error;
use crate::config::{Random, RandomUsage};

use std::fmt;

/// Longest connection ID allowed by QUIC version 1.
pub const MAX_CID_LEN: usize = 20;

/// Sequence number marker for "invalid/unassigned".
pub const INVALID_SEQ: i64 = -1;

// connection IDs and reset tokens both print as bare hex
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }

    Ok(())
}

/// An owned QUIC connection ID: 0 to 20 bytes in version 1, zero length
/// meaning the peer is addressed by its 5-tuple alone.
///
/// Packet headers borrow their ID bytes straight from the datagram; this
/// type is for the IDs a connection keeps across packets, in the issuer
/// and acceptor maps and in parsed frames.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionId(Vec<u8>);

impl ConnectionId {
    pub fn new(bytes: &[u8]) -> Self {
        ConnectionId(bytes.to_vec())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the packet bytes in `payload` begin with this ID. Short
    /// header parsing resolves its destination ID length with this.
    pub fn is_prefix_of(&self, payload: &[u8]) -> bool {
        payload.starts_with(&self.0)
    }
}

impl From<Vec<u8>> for ConnectionId {
    fn from(bytes: Vec<u8>) -> Self {
        ConnectionId(bytes)
    }
}

impl AsRef<[u8]> for ConnectionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

/// The 16-byte stateless reset token bound to a connection ID. The
/// all-zero value is the null token; it never matches an incoming reset.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatelessResetToken([u8; 16]);

impl StatelessResetToken {
    pub const NULL: StatelessResetToken = StatelessResetToken([0; 16]);

    pub const fn new(token: [u8; 16]) -> Self {
        StatelessResetToken(token)
    }

    /// Copies a token out of wire bytes. Fails unless exactly 16 bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self, Error> {
        let token = raw.try_into().map_err(|_| Error::BufferTooShort)?;
        Ok(StatelessResetToken(token))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl AsRef<[u8]> for StatelessResetToken {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StatelessResetToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

/// A connection-ID record: the ID, its sequence number, and the reset
/// token bound to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CidEntry {
    pub seq: i64,
    pub id: ConnectionId,
    pub reset_token: StatelessResetToken,
}

impl CidEntry {
    pub fn new(seq: i64, id: impl Into<Vec<u8>>, reset_token: StatelessResetToken) -> Self {
        CidEntry {
            seq,
            id: ConnectionId::from(id.into()),
            reset_token,
        }
    }
}

/// Exports locally issued connection IDs to the surrounding endpoint, so
/// an upstream demultiplexer can route packets by CID.
///
/// `generate` fills the ID and token for a new issuance; `add` and
/// `retire` report routing-table changes. The bytes are borrowed; an
/// implementation must copy what it keeps.
pub trait CidExporter {
    fn generate(
        &mut self,
        random: &Random,
        version: u32,
        id: &mut [u8],
        token: &mut [u8; 16],
    ) -> Result<(), Error>;

    fn add(&mut self, _id: &[u8], _token: &StatelessResetToken) {}

    fn retire(&mut self, _id: &[u8], _token: &StatelessResetToken) {}
}

/// Default exporter: draws the ID and token straight from the random
/// source and exports nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomExporter;

impl CidExporter for RandomExporter {
    fn generate(
        &mut self,
        random: &Random,
        _version: u32,
        id: &mut [u8],
        token: &mut [u8; 16],
    ) -> Result<(), Error> {
        if !random.is_valid() {
            return Err(Error::UserArg("invalid random"));
        }
        if !random.fill(id, RandomUsage::ConnectionId)
            || !random.fill(token, RandomUsage::StatelessResetToken)
        {
            return Err(Error::UserArg("gen_random failed"));
        }
        Ok(())
    }
}

/// The destination IDs a client uses before the peer issues any: the
/// random initial ID it generated itself, and the ID a Retry packet
/// supplied.
#[derive(Clone, Debug, Default)]
pub struct InitialRetry {
    initial_random: Vec<u8>,
    retry_random: Vec<u8>,
}

impl InitialRetry {
    pub fn reset(&mut self) {
        self.initial_random.clear();
        self.retry_random.clear();
    }

    fn gen(target: &mut Vec<u8>, size: u8, random: &Random, usage: RandomUsage) -> bool {
        if !random.is_valid() {
            return false;
        }
        let size = size.max(8) as usize;
        let mut id = vec![0u8; size];
        if !random.fill(&mut id, usage) {
            return false;
        }
        *target = id;
        true
    }

    /// Client side only; servers learn the initial ID from the wire.
    pub fn gen_initial(&mut self, is_server: bool, size: u8, random: &Random) -> bool {
        if is_server {
            return false;
        }
        Self::gen(&mut self.initial_random, size, random, RandomUsage::OriginalDstId)
    }

    pub fn gen_retry(&mut self, is_server: bool, size: u8, random: &Random) -> bool {
        if is_server {
            return false;
        }
        Self::gen(&mut self.retry_random, size, random, RandomUsage::RetryId)
    }

    pub fn recv_initial(&mut self, is_server: bool, id: &[u8]) -> bool {
        if !is_server {
            return false;
        }
        self.initial_random = id.to_vec();
        true
    }

    pub fn recv_retry(&mut self, is_server: bool, id: &[u8]) -> bool {
        if is_server {
            return false;
        }
        self.retry_random = id.to_vec();
        true
    }

    pub fn has_retry(&self) -> bool {
        !self.retry_random.is_empty()
    }

    pub fn initial(&self) -> &[u8] {
        &self.initial_random
    }

    pub fn retry(&self) -> &[u8] {
        &self.retry_random
    }

    /// The Retry-supplied ID once one exists, the initial one before.
    pub fn initial_or_retry(&self) -> &[u8] {
        if self.has_retry() {
            &self.retry_random
        } else {
            &self.initial_random
        }
    }
}
