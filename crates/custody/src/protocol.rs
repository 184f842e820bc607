//! Wire codec for the handoff protocol.
//!
//! Every packet shares one layout: a 1-byte kind discriminant, a 16-byte
//! player identifier, and a variable-length payload. `PeerReady` carries the
//! nil identifier; an empty `DataResponse` payload means "no data available".

use crate::error::CustodyError;
use crate::types::PlayerId;

const KIND_PEER_READY: u8 = 1;
const KIND_DATA_REQUEST: u8 = 2;
const KIND_DATA_RESPONSE: u8 = 3;

/// Byte offset of the payload: 1 kind byte + 16 id bytes.
const HEADER_LEN: usize = 17;

/// Tagged union of messages exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Announcement that a peer is up. Not processed locally; re-broadcast
    /// upward to the enclosing router.
    PeerReady,
    /// Ask whichever node currently serves `player` for its state.
    DataRequest { player: PlayerId },
    /// Answer to a `DataRequest`. An empty payload means the responder holds
    /// no forwardable data (already mid-transfer, or nothing to send).
    DataResponse { player: PlayerId, payload: Vec<u8> },
}

impl Packet {
    pub fn kind(&self) -> u8 {
        match self {
            Packet::PeerReady => KIND_PEER_READY,
            Packet::DataRequest { .. } => KIND_DATA_REQUEST,
            Packet::DataResponse { .. } => KIND_DATA_RESPONSE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (player, payload): (PlayerId, &[u8]) = match self {
            Packet::PeerReady => (PlayerId::nil(), &[]),
            Packet::DataRequest { player } => (*player, &[]),
            Packet::DataResponse { player, payload } => (*player, payload),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(self.kind());
        out.extend_from_slice(player.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(input: &[u8]) -> Result<Self, CustodyError> {
        if input.len() < HEADER_LEN {
            return Err(CustodyError::MalformedPacket {
                reason: format!("packet too short: {} bytes", input.len()),
                source: None,
            });
        }
        let kind = input[0];
        let mut id = [0u8; 16];
        id.copy_from_slice(&input[1..HEADER_LEN]);
        let player = PlayerId::from_bytes(id);
        let payload = &input[HEADER_LEN..];

        match kind {
            KIND_PEER_READY => Ok(Packet::PeerReady),
            KIND_DATA_REQUEST => Ok(Packet::DataRequest { player }),
            KIND_DATA_RESPONSE => Ok(Packet::DataResponse {
                player,
                payload: payload.to_vec(),
            }),
            other => Err(CustodyError::UnknownPacketKind { kind: other }),
        }
    }
}
