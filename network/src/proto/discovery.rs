//! Bodies of the four discovery datagrams.
//!
//! These records describe everything after the `hash ‖ sig ‖ type` frame
//! header; the header itself lives in the codec.

use tl_proto::{TlRead, TlWrite};

use crate::types::{NodeEndpoint, NodeId};

/// Discovery protocol version carried in every [`Ping`].
pub const PROTOCOL_VERSION: u32 = 4;

/// Liveness probe. Answered with a [`Pong`] echoing the frame hash.
#[derive(Debug, Clone, PartialEq, Eq, TlRead, TlWrite)]
#[tl(boxed, id = 0x0ea3_4c1d)]
pub struct Ping {
    pub version: u32,
    /// Sender's view of its own endpoint. The receiver overrides the
    /// address and UDP port with the observed datagram origin.
    pub source: NodeEndpoint,
    pub destination: NodeEndpoint,
    pub expires_at: u32,
}

/// Response to a [`Ping`].
#[derive(Debug, Clone, PartialEq, Eq, TlRead, TlWrite)]
#[tl(boxed, id = 0x4d25_9fe6)]
pub struct Pong {
    /// The ping's source endpoint as observed by the responder. Lets the
    /// ping sender learn its externally visible address.
    pub destination: NodeEndpoint,
    /// Frame hash of the ping being answered.
    pub echo: [u8; 32],
    pub expires_at: u32,
}

/// Request for the peers closest to `target`.
#[derive(Debug, Clone, PartialEq, Eq, TlRead, TlWrite)]
#[tl(boxed, id = 0x71d8_b02a)]
pub struct FindNode {
    pub target: NodeId,
    pub expires_at: u32,
}

/// One entry of a [`Neighbours`] response.
#[derive(Debug, Clone, PartialEq, Eq, TlRead, TlWrite)]
pub struct Neighbour {
    pub endpoint: NodeEndpoint,
    pub id: NodeId,
}

/// Response to a [`FindNode`] request. Large results are split over
/// several datagrams, each carrying its own `Neighbours` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbours {
    pub nodes: Vec<Neighbour>,
    pub expires_at: u32,
}

impl Neighbours {
    pub const TL_ID: u32 = 0x3c9b_f582;

    /// Hard cap on entries accepted from a single datagram.
    pub const MAX_NODES: usize = 16;
}

impl TlWrite for Neighbours {
    type Repr = tl_proto::Boxed;

    fn max_size_hint(&self) -> usize {
        4 + 4
            + self
                .nodes
                .iter()
                .map(TlWrite::max_size_hint)
                .sum::<usize>()
            + 4
    }

    fn write_to<P>(&self, packet: &mut P)
    where
        P: tl_proto::TlPacket,
    {
        packet.write_u32(Self::TL_ID);
        packet.write_u32(self.nodes.len() as u32);
        for node in &self.nodes {
            node.write_to(packet);
        }
        packet.write_u32(self.expires_at);
    }
}

impl<'a> TlRead<'a> for Neighbours {
    type Repr = tl_proto::Boxed;

    fn read_from(packet: &'a [u8], offset: &mut usize) -> tl_proto::TlResult<Self> {
        use tl_proto::TlError;

        if u32::read_from(packet, offset)? != Self::TL_ID {
            return Err(TlError::UnknownConstructor);
        }

        let len = u32::read_from(packet, offset)? as usize;
        if len > Self::MAX_NODES {
            return Err(TlError::InvalidData);
        }

        let mut nodes = Vec::with_capacity(len);
        for _ in 0..len {
            nodes.push(Neighbour::read_from(packet, offset)?);
        }

        let expires_at = u32::read_from(packet, offset)?;
        Ok(Self { nodes, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn bodies_roundtrip() {
        let endpoint = NodeEndpoint::from_str("203.0.113.7:30303").unwrap();

        let ping = Ping {
            version: PROTOCOL_VERSION,
            source: endpoint.clone(),
            destination: NodeEndpoint::from_str("203.0.113.8:30303").unwrap(),
            expires_at: 1700000060,
        };
        let bytes = tl_proto::serialize(&ping);
        assert_eq!(tl_proto::deserialize::<Ping>(&bytes).unwrap(), ping);

        let pong = Pong {
            destination: endpoint.clone(),
            echo: [0xab; 32],
            expires_at: 1700000060,
        };
        let bytes = tl_proto::serialize(&pong);
        assert_eq!(tl_proto::deserialize::<Pong>(&bytes).unwrap(), pong);

        let find_node = FindNode {
            target: rand::random(),
            expires_at: 1700000060,
        };
        let bytes = tl_proto::serialize(&find_node);
        assert_eq!(tl_proto::deserialize::<FindNode>(&bytes).unwrap(), find_node);

        let neighbours = Neighbours {
            nodes: vec![
                Neighbour {
                    endpoint: endpoint.clone(),
                    id: rand::random(),
                },
                Neighbour {
                    endpoint: NodeEndpoint::from_str("[2001:4860::8888]:30303").unwrap(),
                    id: rand::random(),
                },
            ],
            expires_at: 1700000060,
        };
        let bytes = tl_proto::serialize(&neighbours);
        assert_eq!(
            tl_proto::deserialize::<Neighbours>(&bytes).unwrap(),
            neighbours
        );
    }

    #[test]
    fn neighbours_list_is_bounded() {
        let neighbours = Neighbours {
            nodes: (0..Neighbours::MAX_NODES + 1)
                .map(|_| Neighbour {
                    endpoint: NodeEndpoint::from_str("203.0.113.7:30303").unwrap(),
                    id: rand::random(),
                })
                .collect(),
            expires_at: 1700000060,
        };

        let bytes = tl_proto::serialize(&neighbours);
        assert!(tl_proto::deserialize::<Neighbours>(&bytes).is_err());
    }
}
