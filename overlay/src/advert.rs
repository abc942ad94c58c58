use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::neighbourhood::Neighbourhood;
use crate::node::NodeId;

/// A route as carried on the wire and in the router table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub service: String,
    pub router: NodeId,
    pub gateway: String,
    pub link: String,
    #[serde(default)]
    pub metric: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub route: Route,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvertType {
    Announce,
    Update,
}

/// A batch of route events, either as received over the `control` channel or
/// as repackaged for delivery to [`crate::router::Router::process`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advert {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub advert_type: AdvertType,
    pub timestamp: DateTime<Utc>,
    pub ttl: u32,
    pub events: Vec<RouteEvent>,
}

/// The `control` channel's application-layer message. Only one method exists
/// today (`advert`); kept as an enum so a second control message type is a
/// match arm, not a new header convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ControlMessage {
    Advert(Advert),
}

/// The route-metric ladder: self = 1, direct neighbour = 10,
/// neighbour-of-neighbour = 100, anything else = 1000.
pub async fn set_route_metric(neighbourhood: &Neighbourhood, router: &NodeId) -> u32 {
    if router == neighbourhood.self_id() {
        return 1;
    }
    if neighbourhood.is_direct_neighbour(router).await {
        return 10;
    }
    if neighbourhood.is_two_hop(router).await {
        return 100;
    }
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[tokio::test]
    async fn metric_ladder_matches_graph_distance() {
        let nh = Neighbourhood::new(NodeId::from("S"), "s-addr".into());
        nh.handle_connect(Node::new(NodeId::from("N1"), "n1-addr".into())).await;
        nh.handle_neighbour(
            Node::new(NodeId::from("N1"), "n1-addr".into()),
            vec![Node::new(NodeId::from("N2"), "n2-addr".into())],
        )
        .await;

        assert_eq!(set_route_metric(&nh, &NodeId::from("S")).await, 1);
        assert_eq!(set_route_metric(&nh, &NodeId::from("N1")).await, 10);
        assert_eq!(set_route_metric(&nh, &NodeId::from("N2")).await, 100);
        assert_eq!(set_route_metric(&nh, &NodeId::from("Z")).await, 1000);
    }

    proptest::proptest! {
        #[test]
        fn metric_never_exceeds_the_ladder_ceiling(
            direct in proptest::collection::vec("[a-z]{1,8}", 0..6),
            two_hop in proptest::collection::vec("[a-z]{1,8}", 0..6),
            queried in "[a-z]{1,8}",
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let nh = Neighbourhood::new(NodeId::from("self"), "self-addr".into());
                for id in &direct {
                    nh.handle_connect(Node::new(NodeId::from(id.as_str()), format!("{id}-addr"))).await;
                }
                if let Some(first_direct) = direct.first() {
                    let reported: Vec<Node> = two_hop
                        .iter()
                        .map(|id| Node::new(NodeId::from(id.as_str()), format!("{id}-addr")))
                        .collect();
                    nh.handle_neighbour(
                        Node::new(NodeId::from(first_direct.as_str()), format!("{first_direct}-addr")),
                        reported,
                    )
                    .await;
                }

                let metric = set_route_metric(&nh, &NodeId::from(queried.as_str())).await;
                proptest::prop_assert!(matches!(metric, 1 | 10 | 100 | 1000));
                if queried == "self" {
                    proptest::prop_assert_eq!(metric, 1);
                }
                Ok(())
            })?;
        }
    }
}
