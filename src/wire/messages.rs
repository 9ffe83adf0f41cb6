use serde::{Deserialize, Serialize};

pub type Uint32 = u32;
pub type Uint64 = u64;
/// A fixed-width 32-byte value: nonces, transaction hashes, node
/// identities' raw bytes.
pub type Uint256 = [u8; 32];

/// An ed25519 long-term node identity, as carried in HELLO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeId(pub Uint256);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curve25519Public {
    pub key: Uint256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] pub Vec<u8>);

/// Binds an ephemeral Curve25519 public key to the sender's long-term
/// identity, signed and time-bounded (section 4.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCert {
    pub pubkey: Curve25519Public,
    pub expiration: Uint64,
    pub sig: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub ledger_version: Uint32,
    pub overlay_min_version: Uint32,
    pub overlay_version: Uint32,
    pub version_str: String,
    pub network_id: Uint256,
    pub listening_port: i32,
    pub peer_id: NodeId,
    pub cert: AuthCert,
    pub nonce: Uint256,
}

/// AUTH flags, a bitmask of optional capabilities. Only one bit is defined
/// by the spec: byte-axis flow control.
pub mod auth_flags {
    pub const FLAG_FLOW_CONTROL_BYTES: u32 = 0x1;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub flags: Uint32,
}

/// Identifies what kind of object a `DontHave`/`GetTxSet`/etc refers to, so
/// a single hash-keyed request can be routed to the right collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    TxSet,
    GeneralizedTxSet,
    Transaction,
    ScpQuorumset,
    ScpState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DontHave {
    pub type_: MessageType,
    pub req_hash: Uint256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: [u8; 4],
    pub port: Uint32,
    pub num_failures: Uint32,
}

/// An opaque, already-encoded transaction-set frame. Decoding and
/// validating its contents is the Ledger/Consensus Engine's job; the
/// overlay only moves bytes and the hash that identifies them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSetFrame(#[serde(with = "serde_bytes")] pub Vec<u8>);

/// An opaque, already-encoded transaction envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope(#[serde(with = "serde_bytes")] pub Vec<u8>);

/// An opaque, already-encoded SCP envelope (nomination/ballot message).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpEnvelope(#[serde(with = "serde_bytes")] pub Vec<u8>);

/// An opaque, already-encoded SCP quorum set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpQuorumSet(#[serde(with = "serde_bytes")] pub Vec<u8>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyRequest {
    pub surveyor_peer_id: NodeId,
    pub surveyed_peer_id: NodeId,
    pub ledger_num: Uint32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub surveyor_peer_id: NodeId,
    pub surveyed_peer_id: NodeId,
    pub ledger_num: Uint32,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// A one-directional credit grant of `num_messages` additional flood
/// messages (section 4.2, GLOSSARY "Credit / SEND_MORE").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMore {
    pub num_messages: Uint32,
}

/// The byte-axis variant of SEND_MORE, only meaningful on an authenticated
/// connection whose both sides negotiated byte flow control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMoreExtended {
    pub num_messages: Uint32,
    pub num_bytes: Uint32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodAdvert {
    pub tx_hashes: Vec<Uint256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodDemand {
    pub tx_hashes: Vec<Uint256>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTxSet {
    pub tx_set_hash: Uint256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetScpQuorumSet {
    pub qset_hash: Uint256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetScpState {
    pub ledger_seq: Uint32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Error {
    pub code: Uint32,
    pub msg: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPeers;

/// The discriminated union of every message the overlay may exchange
/// (section 6). `TxSet` and `GeneralizedTxSet` are intentionally handled
/// identically by the router (see `Open Questions` in the spec) — kept as
/// two variants because the wire format distinguishes them, but routed the
/// same way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    ErrorMsg(Error),
    Hello(Hello),
    Auth(Auth),
    DontHave(DontHave),
    GetPeers(GetPeers),
    Peers(Vec<PeerAddress>),
    GetTxSet(GetTxSet),
    TxSet(TxSetFrame),
    GeneralizedTxSet(TxSetFrame),
    Transaction(TransactionEnvelope),
    GetScpQuorumSet(GetScpQuorumSet),
    ScpQuorumSet(ScpQuorumSet),
    ScpMessage(ScpEnvelope),
    GetScpState(GetScpState),
    SurveyRequest(SurveyRequest),
    SurveyResponse(SurveyResponse),
    SendMore(SendMore),
    SendMoreExtended(SendMoreExtended),
    FloodAdvert(FloodAdvert),
    FloodDemand(FloodDemand),
}

impl Message {
    /// HELLO and ERROR_MSG travel unauthenticated; everything else must
    /// carry a valid MAC under the per-direction sequence (invariant (d)).
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Message::Hello(_) | Message::ErrorMsg(_))
    }
}

/// A 32-byte HMAC over `(sequence ‖ encoded-message)`. Zeroed for the two
/// unauthenticated message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmacSha256Mac {
    pub mac: Uint256,
}

/// The authenticated envelope every frame carries on the wire (section 6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedMessage {
    pub sequence: Uint64,
    pub message: Message,
    pub mac: HmacSha256Mac,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Message) -> Message {
        let bytes = serde_xdr::to_bytes(msg).expect("encode");
        serde_xdr::from_bytes(&bytes).expect("decode")
    }

    #[test]
    fn hello_roundtrips() {
        let hello = Message::Hello(Hello {
            ledger_version: 21,
            overlay_min_version: 27,
            overlay_version: 35,
            version_str: "overlay-core[0.1.0]".into(),
            network_id: [7u8; 32],
            listening_port: 11625,
            peer_id: NodeId([1u8; 32]),
            cert: AuthCert {
                pubkey: Curve25519Public { key: [2u8; 32] },
                expiration: 1_700_000_000,
                sig: Signature(vec![9, 9, 9]),
            },
            nonce: [3u8; 32],
        });
        assert_eq!(roundtrip(&hello), hello);
    }

    #[test]
    fn flood_advert_roundtrips() {
        let msg = Message::FloodAdvert(FloodAdvert {
            tx_hashes: vec![[1u8; 32], [2u8; 32]],
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn send_more_extended_roundtrips() {
        let msg = Message::SendMoreExtended(SendMoreExtended {
            num_messages: 200,
            num_bytes: 300_000,
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn authenticated_envelope_roundtrips() {
        let am = AuthenticatedMessage {
            sequence: 42,
            message: Message::SendMore(SendMore { num_messages: 5 }),
            mac: HmacSha256Mac { mac: [4u8; 32] },
        };
        let bytes = serde_xdr::to_bytes(&am).unwrap();
        let decoded: AuthenticatedMessage = serde_xdr::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, am);
    }

    #[test]
    fn hello_and_error_are_unauthenticated() {
        assert!(Message::Hello(Hello {
            ledger_version: 0,
            overlay_min_version: 0,
            overlay_version: 0,
            version_str: String::new(),
            network_id: [0; 32],
            listening_port: 0,
            peer_id: NodeId([0; 32]),
            cert: AuthCert {
                pubkey: Curve25519Public { key: [0; 32] },
                expiration: 0,
                sig: Signature(vec![]),
            },
            nonce: [0; 32],
        })
        .is_unauthenticated());
        assert!(Message::ErrorMsg(Error {
            code: 0,
            msg: String::new()
        })
        .is_unauthenticated());
        assert!(!Message::GetPeers(GetPeers).is_unauthenticated());
    }
}
