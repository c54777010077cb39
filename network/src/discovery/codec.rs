//! Discovery datagram framing.
//!
//! ```text
//! offset  size  field
//! 0       32    frame hash    = keccak256(sig ‖ type ‖ body)
//! 32      65    signature     = sign(keccak256(type ‖ body))
//! 97      1     packet type
//! 98      ...   body
//! ```

use bytes::Bytes;

use crate::crypto::{self, Keypair, SIGNATURE_SIZE};
use crate::proto::discovery as proto;
use crate::types::NodeId;

/// Discovery datagrams must fit a conservative path MTU.
pub const MAX_DATAGRAM_SIZE: usize = 1280;

/// How many neighbour records fit a single response datagram.
pub const MAX_NEIGHBOURS_PER_DATAGRAM: usize = (MAX_DATAGRAM_SIZE - 109) / 90;

const HASH_SIZE: usize = 32;
const HEADER_SIZE: usize = HASH_SIZE + SIGNATURE_SIZE + 1;
// the smallest well-formed body is a handful of bytes
const MIN_DATAGRAM_SIZE: usize = HEADER_SIZE + 3;

const PACKET_PING: u8 = 0x01;
const PACKET_PONG: u8 = 0x02;
const PACKET_FIND_NODE: u8 = 0x03;
const PACKET_NEIGHBOURS: u8 = 0x04;

#[derive(Debug, thiserror::Error)]
pub enum PacketDecodeError {
    #[error("packet is too small")]
    TooSmall,
    #[error("frame hash mismatch")]
    BadHash,
    #[error("failed to recover packet signer")]
    BadSignature,
    #[error("unknown packet type: {0:#04x}")]
    UnknownType(u8),
    #[error("failed to decode packet body: {0:?}")]
    BodyDecode(tl_proto::TlError),
}

/// A validated inbound datagram.
#[derive(Debug)]
pub struct Packet {
    /// Frame hash; echoed back when answering a ping.
    pub hash: [u8; 32],
    /// Recovered signer.
    pub source_id: NodeId,
    pub body: PacketBody,
}

#[derive(Debug)]
pub enum PacketBody {
    Ping(proto::Ping),
    Pong(proto::Pong),
    FindNode(proto::FindNode),
    Neighbours(proto::Neighbours),
}

impl PacketBody {
    pub fn expires_at(&self) -> u32 {
        match self {
            Self::Ping(body) => body.expires_at,
            Self::Pong(body) => body.expires_at,
            Self::FindNode(body) => body.expires_at,
            Self::Neighbours(body) => body.expires_at,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::FindNode(_) => "find_node",
            Self::Neighbours(_) => "neighbours",
        }
    }

    fn packet_type(&self) -> u8 {
        match self {
            Self::Ping(_) => PACKET_PING,
            Self::Pong(_) => PACKET_PONG,
            Self::FindNode(_) => PACKET_FIND_NODE,
            Self::Neighbours(_) => PACKET_NEIGHBOURS,
        }
    }
}

/// Assembles and signs an outbound datagram.
pub fn encode(keypair: &Keypair, body: &PacketBody) -> Bytes {
    let encoded_body = match body {
        PacketBody::Ping(body) => tl_proto::serialize(body),
        PacketBody::Pong(body) => tl_proto::serialize(body),
        PacketBody::FindNode(body) => tl_proto::serialize(body),
        PacketBody::Neighbours(body) => tl_proto::serialize(body),
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + encoded_body.len());
    buf.resize(HASH_SIZE + SIGNATURE_SIZE, 0);
    buf.push(body.packet_type());
    buf.extend_from_slice(&encoded_body);

    let signed_digest = crypto::keccak256(&buf[HASH_SIZE + SIGNATURE_SIZE..]);
    let signature = keypair.sign(signed_digest);
    buf[HASH_SIZE..HASH_SIZE + SIGNATURE_SIZE].copy_from_slice(&signature);

    let frame_hash = crypto::keccak256(&buf[HASH_SIZE..]);
    buf[..HASH_SIZE].copy_from_slice(&frame_hash);

    Bytes::from(buf)
}

/// Validates a datagram and recovers its signer.
pub fn decode(data: &[u8]) -> Result<Packet, PacketDecodeError> {
    if data.len() < MIN_DATAGRAM_SIZE {
        return Err(PacketDecodeError::TooSmall);
    }

    let frame_hash = crypto::keccak256(&data[HASH_SIZE..]);
    if frame_hash != data[..HASH_SIZE] {
        return Err(PacketDecodeError::BadHash);
    }

    let mut signature = [0; SIGNATURE_SIZE];
    signature.copy_from_slice(&data[HASH_SIZE..HASH_SIZE + SIGNATURE_SIZE]);

    let signed_digest = crypto::keccak256(&data[HASH_SIZE + SIGNATURE_SIZE..]);
    let source_id =
        crypto::recover(&signature, signed_digest).ok_or(PacketDecodeError::BadSignature)?;

    let body_bytes = &data[HEADER_SIZE..];
    let body = match data[HASH_SIZE + SIGNATURE_SIZE] {
        PACKET_PING => PacketBody::Ping(
            tl_proto::deserialize(body_bytes).map_err(PacketDecodeError::BodyDecode)?,
        ),
        PACKET_PONG => PacketBody::Pong(
            tl_proto::deserialize(body_bytes).map_err(PacketDecodeError::BodyDecode)?,
        ),
        PACKET_FIND_NODE => PacketBody::FindNode(
            tl_proto::deserialize(body_bytes).map_err(PacketDecodeError::BodyDecode)?,
        ),
        PACKET_NEIGHBOURS => PacketBody::Neighbours(
            tl_proto::deserialize(body_bytes).map_err(PacketDecodeError::BodyDecode)?,
        ),
        ty => return Err(PacketDecodeError::UnknownType(ty)),
    };

    let mut hash = [0; HASH_SIZE];
    hash.copy_from_slice(&data[..HASH_SIZE]);

    Ok(Packet {
        hash,
        source_id,
        body,
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use lodestone_util::time::now_sec;

    use super::*;
    use crate::types::NodeEndpoint;

    fn make_ping(expires_at: u32) -> PacketBody {
        PacketBody::Ping(proto::Ping {
            version: proto::PROTOCOL_VERSION,
            source: NodeEndpoint::from_str("203.0.113.7:30303").unwrap(),
            destination: NodeEndpoint::from_str("203.0.113.8:30303").unwrap(),
            expires_at,
        })
    }

    #[test]
    fn roundtrip_recovers_signer() {
        let keypair = Keypair::generate(&mut rand::thread_rng());
        let expires_at = now_sec() + 60;

        let bodies = [
            make_ping(expires_at),
            PacketBody::Pong(proto::Pong {
                destination: NodeEndpoint::from_str("203.0.113.7:30303").unwrap(),
                echo: [0x11; 32],
                expires_at,
            }),
            PacketBody::FindNode(proto::FindNode {
                target: rand::random(),
                expires_at,
            }),
            PacketBody::Neighbours(proto::Neighbours {
                nodes: vec![proto::Neighbour {
                    endpoint: NodeEndpoint::from_str("203.0.113.9:30303").unwrap(),
                    id: rand::random(),
                }],
                expires_at,
            }),
        ];

        for body in bodies {
            let datagram = encode(&keypair, &body);
            assert!(datagram.len() <= MAX_DATAGRAM_SIZE);

            let packet = decode(&datagram).unwrap();
            assert_eq!(packet.source_id, *keypair.id());
            assert_eq!(packet.body.expires_at(), expires_at);
            assert_eq!(packet.body.type_name(), body.type_name());
            assert_eq!(packet.hash, crypto::keccak256(&datagram[HASH_SIZE..]));
        }
    }

    #[test]
    fn rejects_mutations() {
        let keypair = Keypair::generate(&mut rand::thread_rng());
        let datagram = encode(&keypair, &make_ping(now_sec() + 60));

        // every single-byte flip must be rejected
        for i in 0..datagram.len() {
            let mut mutated = datagram.to_vec();
            mutated[i] ^= 0x01;
            assert!(decode(&mutated).is_err(), "mutation at byte {i} accepted");
        }
    }

    #[test]
    fn rejects_short_packets() {
        assert!(matches!(
            decode(&[0; MIN_DATAGRAM_SIZE - 1]),
            Err(PacketDecodeError::TooSmall)
        ));
        assert!(matches!(decode(&[]), Err(PacketDecodeError::TooSmall)));
    }

    #[test]
    fn rejects_unknown_type() {
        let keypair = Keypair::generate(&mut rand::thread_rng());
        let mut datagram = encode(&keypair, &make_ping(now_sec() + 60)).to_vec();

        // a forged type byte must re-seal the frame hash to get past it
        datagram[HASH_SIZE + SIGNATURE_SIZE] = 0x7f;
        let frame_hash = crypto::keccak256(&datagram[HASH_SIZE..]);
        datagram[..HASH_SIZE].copy_from_slice(&frame_hash);

        assert!(matches!(
            decode(&datagram),
            Err(PacketDecodeError::UnknownType(0x7f))
        ));
    }

    #[test]
    fn neighbours_batch_bound() {
        assert_eq!(MAX_NEIGHBOURS_PER_DATAGRAM, 13);
    }
}
