use thiserror::Error;

/// How a connection-fatal error should be communicated to the peer before
/// the connection is torn down. Mirrors the wire `ERROR_MSG` codes of
/// section 7, kept distinct from `OverlayError` itself so that one Rust
/// error variant can map to the wire code that makes sense for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// ERR_MISC: catch-all, used when no more specific code applies.
    Misc,
    /// ERR_DATA: malformed message content.
    Data,
    /// ERR_CONF: handshake/policy configuration mismatch (bad cert, wrong
    /// network, version mismatch, self-connect, banned peer, duplicate).
    Conf,
    /// ERR_AUTH: authentication failure (MAC mismatch, bad sequence).
    Auth,
    /// ERR_LOAD: the peer rejected us due to load shedding.
    Load,
}

/// Whether the outgoing write queue should be drained before the socket is
/// closed. See `PeerSession::drop` in section 4.5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropMode {
    FlushWriteQueue,
    IgnoreWriteQueue,
}

/// Connection-fatal error taxonomy (section 7). Every variant is fatal: on
/// return, the caller moves the connection to `CLOSING`. `wire_code` and
/// `drop_mode` give the reaction table from the spec without needing a
/// second match at every call site.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("bad auth certificate: {0}")]
    BadCert(String),
    #[error("peer is banned")]
    BannedPeer,
    #[error("network id mismatch")]
    WrongNetwork,
    #[error("overlay version ranges do not overlap")]
    VersionMismatch,
    #[error("connecting to self")]
    SelfConnect,
    #[error("already connected to this peer")]
    DuplicatePeer,
    #[error("out of order message: expected seq {expected}, got {got}")]
    OutOfOrderMessage { expected: u64, got: u64 },
    #[error("MAC verification failed")]
    MacMismatch,

    #[error("flood message received without credit: {0}")]
    FloodWithoutCredit(String),
    #[error("malformed SEND_MORE: {0}")]
    MalformedSendMore(String),
    #[error("message sent before handshake completed")]
    MessageBeforeHandshake,

    #[error("policy rejection: {0}")]
    PolicyRejected(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {0} bytes exceeds the 16 MiB ceiling")]
    FrameTooLarge(usize),
    #[error("wire decode error: {0}")]
    Decode(String),
    #[error("wire encode error: {0}")]
    Encode(String),

    #[error("idle timeout")]
    IdleTimeout,
    #[error("idle timeout (no new flood requests)")]
    FlowIdleTimeout,
    #[error("straggling (cannot keep up)")]
    Straggler,

    #[error("connection shutting down")]
    ShuttingDown,
}

impl OverlayError {
    /// The wire error code to report to the peer, if any. Some errors (MAC
    /// mismatch, protocol violations, transport failures, liveness drops)
    /// are not meaningful to report and the connection is simply dropped.
    pub fn wire_code(&self) -> Option<ErrorCode> {
        use OverlayError::*;
        match self {
            BadCert(_) | WrongNetwork | VersionMismatch | SelfConnect | DuplicatePeer
            | BannedPeer => Some(ErrorCode::Conf),
            MacMismatch | OutOfOrderMessage { .. } => Some(ErrorCode::Auth),
            PolicyRejected(_) => Some(ErrorCode::Load),
            _ => None,
        }
    }

    pub fn drop_mode(&self) -> DropMode {
        use OverlayError::*;
        match self {
            BadCert(_) | WrongNetwork | VersionMismatch | SelfConnect | BannedPeer
            | DuplicatePeer | PolicyRejected(_) => DropMode::FlushWriteQueue,
            _ => DropMode::IgnoreWriteQueue,
        }
    }
}
