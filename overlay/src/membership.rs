use serde::{Deserialize, Serialize};

use crate::node::Node;

/// The body shared by all three membership methods: the node the message is
/// about, plus whatever neighbours it wants to report (empty for `connect`
/// and `close`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPayload {
    pub node: Node,
    #[serde(default)]
    pub neighbours: Vec<Node>,
}

/// The `network` channel's application-layer message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum NetworkMessage {
    Connect(MembershipPayload),
    Neighbour(MembershipPayload),
    Close(MembershipPayload),
}
