use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use sha3::{Digest, Keccak256};

use crate::types::NodeId;

pub const SIGNATURE_SIZE: usize = 65;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Local discovery identity: a secp256k1 secret key and the node id
/// derived from its public key.
#[derive(Clone)]
pub struct Keypair {
    secret: SecretKey,
    id: NodeId,
}

impl Keypair {
    pub fn generate<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_secret(SecretKey::new(rng))
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Self {
            secret,
            id: node_id_from_public(&public),
        }
    }

    #[inline]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Signs a 32-byte digest, producing the wire `r ‖ s ‖ v` layout.
    pub(crate) fn sign(&self, digest: [u8; 32]) -> [u8; SIGNATURE_SIZE] {
        let message = Message::from_digest(digest);
        let (recovery_id, data) = SECP256K1
            .sign_ecdsa_recoverable(&message, &self.secret)
            .serialize_compact();

        let mut signature = [0; SIGNATURE_SIZE];
        signature[..64].copy_from_slice(&data);
        signature[64] = recovery_id.to_i32() as u8;
        signature
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair").field("id", &self.id).finish()
    }
}

/// Recovers the signer of a 32-byte digest from an `r ‖ s ‖ v` signature.
pub(crate) fn recover(signature: &[u8; SIGNATURE_SIZE], digest: [u8; 32]) -> Option<NodeId> {
    let recovery_id = RecoveryId::from_i32(signature[64] as i32).ok()?;
    let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id).ok()?;
    let message = Message::from_digest(digest);
    let public = SECP256K1.recover_ecdsa(&message, &signature).ok()?;
    Some(node_id_from_public(&public))
}

fn node_id_from_public(public: &PublicKey) -> NodeId {
    // uncompressed serialization is a constant 0x04 prefix over the
    // 64 coordinate bytes
    let uncompressed = public.serialize_uncompressed();
    let mut id = [0; 64];
    id.copy_from_slice(&uncompressed[1..]);
    NodeId(id)
}
