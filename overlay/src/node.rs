use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A known peer in the 2-hop gossip graph.
///
/// Only first-hop neighbours carry a non-empty `neighbours` map: it is the
/// view that neighbour reported about *its* neighbours, not something we
/// expand recursively ourselves.
///
/// `last_seen` is `None` until the first `neighbour` heartbeat is observed
/// for this node — a freshly `connect`-created node is immediately due for
/// pruning rather than freshly alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    #[serde(default)]
    pub neighbours: HashMap<NodeId, Node>,
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn new(id: NodeId, address: String) -> Self {
        Self {
            id,
            address,
            neighbours: HashMap::new(),
            last_seen: None,
        }
    }
}
