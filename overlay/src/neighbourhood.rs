use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::node::{Node, NodeId};
use crate::router::{RouteTable, RouteTableError};

/// The process-wide 2-hop gossip graph. All mutations go through a single
/// reader-writer lock.
pub struct Neighbourhood {
    self_id: NodeId,
    self_address: String,
    neighbours: RwLock<HashMap<NodeId, Node>>,
}

impl Neighbourhood {
    pub fn new(self_id: NodeId, self_address: String) -> Self {
        Self {
            self_id,
            self_address,
            neighbours: RwLock::new(HashMap::new()),
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub async fn self_node(&self) -> Node {
        let neighbours = self.neighbours.read().await;
        self.self_node_locked(&neighbours)
    }

    fn self_node_locked(&self, neighbours: &HashMap<NodeId, Node>) -> Node {
        let mut node = Node::new(self.self_id.clone(), self.self_address.clone());
        node.neighbours = neighbours.clone();
        node
    }

    pub async fn handle_connect(&self, node: Node) {
        if node.id == self.self_id {
            return;
        }
        let mut neighbours = self.neighbours.write().await;
        neighbours
            .entry(node.id.clone())
            .or_insert_with(|| Node::new(node.id.clone(), node.address.clone()));
    }

    /// An already-known neighbour's `last_seen` is *not* refreshed here, only
    /// set on first insertion. Only the neighbour-set replacement below runs
    /// unconditionally.
    pub async fn handle_neighbour(&self, node: Node, reported: Vec<Node>) {
        if node.id == self.self_id {
            return;
        }
        let mut neighbours = self.neighbours.write().await;
        let entry = neighbours.entry(node.id.clone()).or_insert_with(|| {
            let mut fresh = Node::new(node.id.clone(), node.address.clone());
            fresh.last_seen = Some(Instant::now());
            fresh
        });
        for reported_node in reported {
            if reported_node.id == self.self_id {
                continue;
            }
            entry.neighbours.insert(reported_node.id.clone(), reported_node);
        }
    }

    pub async fn handle_close(&self, id: &NodeId, table: &impl RouteTable) {
        if *id == self.self_id {
            return;
        }
        self.prune_node(id, table).await;
    }

    pub async fn prune_node(&self, id: &NodeId, table: &impl RouteTable) {
        self.neighbours.write().await.remove(id);

        match table.query(id).await {
            Ok(routes) => {
                for route in routes {
                    if let Err(e) = table.delete(&route).await {
                        if !matches!(e, RouteTableError::NotFound) {
                            debug!(error = %e, "route delete failed during prune");
                        }
                    }
                }
            }
            Err(e) => {
                if !matches!(e, RouteTableError::NotFound) {
                    debug!(error = %e, "route query failed during prune");
                }
            }
        }
    }

    pub async fn stale(&self, prune_after: Duration) -> Vec<NodeId> {
        self.neighbours
            .read()
            .await
            .iter()
            .filter(|(_, node)| node.last_seen.map_or(true, |seen| seen.elapsed() > prune_after))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn contains(&self, id: &NodeId) -> bool {
        self.neighbours.read().await.contains_key(id)
    }

    pub async fn register_if_unknown(&self, id: &NodeId) {
        let mut neighbours = self.neighbours.write().await;
        neighbours
            .entry(id.clone())
            .or_insert_with(|| Node::new(id.clone(), String::new()));
    }

    pub async fn set_address_if_empty(&self, id: &NodeId, address: String) {
        let mut neighbours = self.neighbours.write().await;
        if let Some(node) = neighbours.get_mut(id) {
            if node.address.is_empty() {
                node.address = address;
            }
        }
    }

    pub async fn is_direct_neighbour(&self, id: &NodeId) -> bool {
        self.neighbours.read().await.contains_key(id)
    }

    pub async fn is_two_hop(&self, id: &NodeId) -> bool {
        self.neighbours.read().await.values().any(|n| n.neighbours.contains_key(id))
    }

    pub async fn neighbour_knows(&self, neighbour: &NodeId, id: &NodeId) -> bool {
        self.neighbours
            .read()
            .await
            .get(neighbour)
            .map_or(false, |n| n.neighbours.contains_key(id))
    }

    /// BFS over the 2-hop graph starting at self, flattened with self included.
    pub async fn nodes(&self) -> Vec<Node> {
        let neighbours = self.neighbours.read().await;
        let self_node = self.self_node_locked(&neighbours);
        drop(neighbours);

        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut frontier = VecDeque::new();
        frontier.push_back(self_node);

        while let Some(node) = frontier.pop_front() {
            if !visited.insert(node.id.clone()) {
                continue;
            }
            for hop in node.neighbours.values() {
                if !visited.contains(&hop.id) {
                    frontier.push_back(hop.clone());
                }
            }
            out.push(node);
        }

        out
    }
}
