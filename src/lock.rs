use crate::catalog::types::{Status, Value};
use crate::catalog::{KeySemaphore, Node, NodeId};
use crate::error::{DirectoryError, EntityKind};
use im::OrdMap;
use parking_lot::RwLock;
use std::fmt;

/// Where a read-only status that rejected a write was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockLevel {
    System,
    Node(NodeId),
    /// No node is writable, so a new key has nowhere to go.
    AllNodes,
    Key,
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockLevel::System => f.write_str("system"),
            LockLevel::Node(id) => write!(f, "node {id}"),
            LockLevel::AllNodes => f.write_str("every node"),
            LockLevel::Key => f.write_str("primary index key"),
        }
    }
}

/// One stored assignment row of a primary index key: the node it lives on
/// and the key's own read-only flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub node_id: NodeId,
    pub key_read_only: bool,
}

/// System and node lock state, shared by every operation of a directory.
///
/// Status changes are visible to the next admission check; admitted
/// operations are never interrupted.
#[derive(Debug, Default)]
pub struct LockCascade {
    system: RwLock<Status>,
    nodes: RwLock<OrdMap<NodeId, Node>>,
}

impl LockCascade {
    pub fn new(system: Status, nodes: impl IntoIterator<Item = Node>) -> Self {
        let nodes = nodes.into_iter().map(|n| (n.id, n)).collect();
        Self {
            system: RwLock::new(system),
            nodes: RwLock::new(nodes),
        }
    }

    pub fn system_status(&self) -> Status {
        *self.system.read()
    }

    pub fn set_system_status(&self, status: Status) {
        *self.system.write() = status;
    }

    pub fn node(&self, id: NodeId) -> Result<Node, DirectoryError> {
        self.nodes
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| DirectoryError::not_found(EntityKind::Node, id))
    }

    /// Point-in-time copy of every known node.
    pub fn nodes(&self) -> OrdMap<NodeId, Node> {
        self.nodes.read().clone()
    }

    pub fn upsert_node(&self, node: Node) {
        self.nodes.write().insert(node.id, node);
    }

    pub fn set_node_status(&self, id: NodeId, status: Status) -> Result<(), DirectoryError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| DirectoryError::not_found(EntityKind::Node, id))?;
        node.status = status;
        Ok(())
    }

    /// Effective lock state of one assignment. A row naming a node the
    /// directory does not know is a corruption of the stored topology.
    pub fn semaphore(&self, assignment: Assignment) -> Result<KeySemaphore, DirectoryError> {
        let nodes = self.nodes.read();
        let node = nodes.get(&assignment.node_id).ok_or_else(|| {
            DirectoryError::corruption(format!(
                "primary index key assigned to unknown node {}",
                assignment.node_id
            ))
        })?;
        Ok(KeySemaphore::new(
            assignment.node_id,
            assignment.key_read_only || node.status.is_read_only(),
        ))
    }

    pub fn semaphores(&self, assignments: &[Assignment]) -> Result<Vec<KeySemaphore>, DirectoryError> {
        assignments.iter().map(|a| self.semaphore(*a)).collect()
    }

    pub fn check_system(&self, key: &Value) -> Result<(), DirectoryError> {
        if self.system_status().is_read_only() {
            return Err(violation(LockLevel::System, key));
        }
        Ok(())
    }

    /// Admission of a new key on `node_id`: system and node must be writable.
    pub fn check_node_write(&self, node_id: NodeId, key: &Value) -> Result<(), DirectoryError> {
        self.check_system(key)?;
        let node = self.node(node_id)?;
        if node.status.is_read_only() {
            return Err(violation(LockLevel::Node(node_id), key));
        }
        Ok(())
    }

    /// Admission of a write under an existing key. Levels are checked from
    /// the widest down so the reported level is the outermost lock.
    pub fn check_key_write(&self, key: &Value, assignments: &[Assignment]) -> Result<(), DirectoryError> {
        self.check_system(key)?;
        {
            let nodes = self.nodes.read();
            for assignment in assignments {
                let locked = nodes
                    .get(&assignment.node_id)
                    .map(|n| n.status.is_read_only())
                    .unwrap_or(false);
                if locked {
                    return Err(violation(LockLevel::Node(assignment.node_id), key));
                }
            }
        }
        if assignments.iter().any(|a| a.key_read_only) {
            return Err(violation(LockLevel::Key, key));
        }
        Ok(())
    }
}

fn violation(level: LockLevel, key: &Value) -> DirectoryError {
    DirectoryError::LockViolation {
        level,
        key: key.to_string(),
    }
}
