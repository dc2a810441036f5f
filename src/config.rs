/* Configuration surface and the caller-provided random source. */
use std::fmt;
use std::sync::Arc;

/// What a random draw is used for. Callers that derive deterministic or
/// keyed values (e.g. hashed reset tokens) dispatch on this.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandomUsage {
    OriginalDstId,
    RetryId,
    ConnectionId,
    StatelessResetToken,
    IdChangeDuration,
    PathChallenge,
}

/// Caller-provided entropy source, stored as a plain function value.
///
/// A default-constructed `Random` is invalid; components that need
/// entropy fail with a user-argument error instead of producing
/// predictable bytes.
#[derive(Clone, Default)]
pub struct Random {
    gen: Option<Arc<dyn Fn(&mut [u8], RandomUsage) -> bool + Send + Sync>>,
}

impl Random {
    pub fn new<F>(gen: F) -> Self
    where
        F: Fn(&mut [u8], RandomUsage) -> bool + Send + Sync + 'static,
    {
        Random {
            gen: Some(Arc::new(gen)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.gen.is_some()
    }

    /// Fills `buf` with random bytes. Returns false when no source is set
    /// or the source reports failure.
    pub fn fill(&self, buf: &mut [u8], usage: RandomUsage) -> bool {
        match &self.gen {
            Some(gen) => gen(buf, usage),
            None => false,
        }
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Random(set)")
        } else {
            write!(f, "Random(unset)")
        }
    }
}

/// Parameters shared by the connection-ID issuer and acceptor.
#[derive(Clone, Debug, Default)]
pub struct CommonParam {
    pub random: Random,
    pub version: u32,
}

/// Policy for periodic destination-CID rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnIdChangeMode {
    /// Keep the active destination ID until the peer forces a change.
    None,

    /// Rotate after a fixed number of packets.
    Constant,

    /// Rotate after a randomized number of packets.
    Random,
}

/// Connection-ID handling knobs: acceptor rotation cadence and issuer
/// issuance cap.
#[derive(Clone, Debug)]
pub struct Config {
    pub change_mode: ConnIdChangeMode,
    pub packet_per_id: u32,
    pub max_packet_per_id: u32,
    /// Length of locally issued connection IDs; 0 selects zero-length mode.
    pub connid_len: u8,
    pub concurrent_limit: u8,
    pub random: Random,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            change_mode: ConnIdChangeMode::Random,
            packet_per_id: 1000,
            max_packet_per_id: 10000,
            connid_len: 4,
            concurrent_limit: 4,
            random: Random::default(),
        }
    }
}

/// DPLPMTUD probing budget and window. Values below 1200 are clamped up
/// at reset; a QUIC endpoint must not operate below 1200 bytes.
#[derive(Clone, Copy, Debug)]
pub struct MtuConfig {
    pub max_probes: u64,
    pub min_plpmtu: u64,
    pub max_plpmtu: u64,
    pub base_plpmtu: u64,
}

impl Default for MtuConfig {
    fn default() -> Self {
        MtuConfig {
            max_probes: 3,
            min_plpmtu: 1200,
            max_plpmtu: 0xffff,
            base_plpmtu: 1200,
        }
    }
}

/// Per-path knobs.
#[derive(Clone, Copy, Debug)]
pub struct PathConfig {
    pub mtu: MtuConfig,
    /// Upper bound on buffered PATH_CHALLENGE tokens. Kept small to blunt
    /// the path-validation amplification attack.
    pub max_path_challenge: u64,
}

impl Default for PathConfig {
    fn default() -> Self {
        PathConfig {
            mtu: MtuConfig::default(),
            max_path_challenge: 256,
        }
    }
}
