use crate::packet;

/// QUIC transport error codes carried on connection close (RFC 9000 20.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// FRAME_ENCODING_ERROR (0x07).
    FrameEncodingError,

    /// CONNECTION_ID_LIMIT_ERROR (0x09).
    ConnectionIdLimitError,

    /// PROTOCOL_VIOLATION (0x0a).
    ProtocolViolation,
}

impl TransportError {
    /// The wire value of the error code.
    pub fn code(&self) -> u64 {
        match self {
            TransportError::FrameEncodingError => 0x07,
            TransportError::ConnectionIdLimitError => 0x09,
            TransportError::ProtocolViolation => 0x0a,
        }
    }
}

/// Frame types the core parses, renders, or tags errors with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Padding,
    NewConnectionId,
    RetireConnectionId,
}

impl FrameType {
    /// The frame type as encoded on the wire.
    pub fn wire(&self) -> u64 {
        match self {
            FrameType::Padding => 0x00,
            FrameType::NewConnectionId => 0x18,
            FrameType::RetireConnectionId => 0x19,
        }
    }
}

/// A fatal connection-level error together with the close information
/// reported to the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuicError {
    pub reason: &'static str,
    pub transport_error: TransportError,
    pub frame_type: FrameType,
    pub packet_type: Option<packet::Type>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The provided buffer is too short. For use with the `octets` module.
    BufferTooShort,

    /// An input field is larger than this layer accepts, e.g. a connection
    /// ID longer than one length byte can describe.
    LargeInput,

    /// A value does not fit the requested integer encoding.
    LargeInt,

    /// A length-prefixed name is not valid UTF-8.
    DecodeUtf8,

    /// The bytes handed to the name encoder are not valid UTF-8.
    EncodeUtf8,

    /// The first byte or type field does not match the expected packet or
    /// frame type.
    UnexpectedType,

    /// The operation cannot be completed because the connection is in an
    /// invalid state.
    InvalidState,

    /// The peer violated a transport-level rule. The connection must close
    /// with the carried code.
    Transport(QuicError),

    /// Caller misuse, e.g. a missing random source.
    UserArg(&'static str),

    /// Connection-ID usage error, e.g. issuance requested in zero-length
    /// mode.
    ConnId(&'static str),

    /// A broken internal invariant. Never triggerable by peer traffic.
    /// The close machinery surfaces these to the peer as
    /// PROTOCOL_VIOLATION while flagging the bug locally.
    Bug(&'static str),
}

impl Error {
    /// True for errors that indicate a bug in this library rather than bad
    /// input or peer behavior.
    pub fn is_bug(&self) -> bool {
        matches!(self, Error::Bug(_))
    }

    /// True for errors that close the connection rather than drop a packet.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Bug(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Transport(e) => write!(
                f,
                "{:?} (frame {:#x}): {}",
                e.transport_error,
                e.frame_type.wire(),
                e.reason
            ),
            Error::UserArg(msg) => write!(f, "user argument error: {msg}"),
            Error::Bug(msg) => write!(f, "library bug: {msg}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<octets::BufferTooShortError> for Error {
    fn from(_err: octets::BufferTooShortError) -> Self {
        Error::BufferTooShort
    }
}

// support conversion to String
impl std::convert::From<Error> for String {
    fn from(err: Error) -> Self {
        format!("{}", err)
    }
}
