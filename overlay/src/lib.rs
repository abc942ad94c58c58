//! Gossip membership and route-advertisement network, layered on a
//! [`tunnel::Tunnel`].
//!
//! [`Neighbourhood`] tracks the 2-hop peer graph; [`Network`] drives the
//! membership (`network` channel) and route-advertisement (`control`
//! channel) protocols over it.

pub mod advert;
pub mod config;
pub mod error;
pub mod membership;
pub mod neighbourhood;
pub mod network;
pub mod node;
pub mod resolver;
pub mod router;

pub use advert::{Advert, AdvertType, ControlMessage, EventType, Route, RouteEvent};
pub use config::OverlayConfig;
pub use error::Error;
pub use membership::{MembershipPayload, NetworkMessage};
pub use neighbourhood::Neighbourhood;
pub use network::{Network, NetworkBuilder};
pub use node::{Node, NodeId};
pub use resolver::Resolver;
pub use router::{RouteTable, RouteTableError, Router};
