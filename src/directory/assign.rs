use crate::catalog::types::Value;
use crate::catalog::{Node, NodeId};
use sha2::{Digest, Sha256};

/// Chooses the node a new primary index key is created on.
pub trait Assigner: Send + Sync {
    /// `candidates` are the writable nodes. `None` when there is nothing
    /// to choose from.
    fn assign(&self, key: &Value, candidates: &[Node]) -> Option<NodeId>;
}

/// Deterministic placement: SHA-256 of the key's encoding, modulo the
/// number of candidates ordered by node id.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashAssigner;

impl Assigner for HashAssigner {
    fn assign(&self, key: &Value, candidates: &[Node]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let mut ids: Vec<NodeId> = candidates.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        let digest = Sha256::digest(key.encode());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let slot = u64::from_be_bytes(prefix) % ids.len() as u64;
        ids.get(slot as usize).copied()
    }
}
