use std::str::FromStr;

use rand::Rng;
use tl_proto::{TlRead, TlWrite};

use crate::crypto;

/// Public key of a peer: the 64 uncompressed secp256k1 coordinate bytes.
///
/// The value used for routing is not the key itself but its Keccak-256
/// [`identifier`](Self::identifier).
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(pub [u8; 64]);

impl NodeId {
    pub const fn wrap(bytes: &[u8; 64]) -> &Self {
        // SAFETY: `[u8; 64]` has the same layout as `NodeId`.
        unsafe { &*(bytes as *const [u8; 64]).cast::<Self>() }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 64] {
        self.0
    }

    /// Keccak-256 of the raw key, the 256-bit value all distances are
    /// computed on.
    pub fn identifier(&self) -> [u8; 32] {
        crypto::keccak256(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 64]
    }
}

impl TlWrite for NodeId {
    type Repr = tl_proto::Bare;

    #[inline]
    fn max_size_hint(&self) -> usize {
        64
    }

    fn write_to<P>(&self, packet: &mut P)
    where
        P: tl_proto::TlPacket,
    {
        packet.write_raw_slice(&self.0);
    }
}

impl<'a> TlRead<'a> for NodeId {
    type Repr = tl_proto::Bare;

    fn read_from(packet: &'a [u8], offset: &mut usize) -> tl_proto::TlResult<Self> {
        let Some(bytes) = packet.get(*offset..*offset + 64) else {
            return Err(tl_proto::TlError::UnexpectedEof);
        };
        *offset += 64;

        let mut id = [0; 64];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = f.precision().unwrap_or(64);
        for byte in self.0.iter().take(len) {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({self:.8})")
    }
}

impl FromStr for NodeId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut node_id = NodeId([0; 64]);
        hex::decode_to_slice(s, &mut node_id.0).map(|_| node_id)
    }
}

impl serde::Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(lodestone_util::serde_helpers::StrVisitor::new())
        } else {
            struct BytesVisitor;

            impl serde::de::Visitor<'_> for BytesVisitor {
                type Value = NodeId;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("64 bytes")
                }

                fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                    let bytes = <&[u8; 64]>::try_from(v).map_err(Error::custom)?;
                    Ok(NodeId(*bytes))
                }
            }

            deserializer.deserialize_bytes(BytesVisitor)
        }
    }
}

impl rand::distributions::Distribution<NodeId> for rand::distributions::Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> NodeId {
        let mut id = NodeId([0; 64]);
        rng.fill(id.0.as_mut_slice());
        id
    }
}

impl PartialEq<&NodeId> for NodeId {
    #[inline]
    fn eq(&self, other: &&NodeId) -> bool {
        self == *other
    }
}

impl PartialEq<NodeId> for &NodeId {
    #[inline]
    fn eq(&self, other: &NodeId) -> bool {
        *self == other
    }
}
