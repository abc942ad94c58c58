use async_trait::async_trait;
use thiserror::Error;

use crate::advert::{Advert, Route};
use crate::node::NodeId;

/// Errors from the router-table collaborator. `NotFound` is non-fatal
/// during prune; any other variant is still non-fatal there (background
/// tasks never propagate) but worth logging.
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("route not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Out-of-scope collaborator: the router's route table.
#[async_trait]
pub trait RouteTable: Send + Sync {
    async fn query(&self, router: &NodeId) -> Result<Vec<Route>, RouteTableError>;
    async fn delete(&self, route: &Route) -> Result<(), RouteTableError>;
}

/// Out-of-scope collaborator: the service router.
#[async_trait]
pub trait Router: Send + Sync {
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Pulls the next locally-originated advert to distribute outbound.
    /// Returns `None` once the router has shut down for good.
    async fn next_advert(&self) -> Option<Advert>;
    async fn process(&self, advert: Advert) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// In-memory test doubles used by this crate's own test suite.
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    #[derive(Default)]
    pub struct MockRouteTable {
        routes: Mutex<Vec<Route>>,
    }

    impl MockRouteTable {
        pub fn seed(&self, route: Route) {
            self.routes.lock().unwrap().push(route);
        }

        pub fn routes(&self) -> Vec<Route> {
            self.routes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RouteTable for MockRouteTable {
        async fn query(&self, router: &NodeId) -> Result<Vec<Route>, RouteTableError> {
            Ok(self
                .routes
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.router == *router)
                .cloned()
                .collect())
        }

        async fn delete(&self, route: &Route) -> Result<(), RouteTableError> {
            let mut routes = self.routes.lock().unwrap();
            let before = routes.len();
            routes.retain(|r| r != route);
            if routes.len() == before {
                return Err(RouteTableError::NotFound);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockRouter {
        pending: AsyncMutex<VecDeque<Advert>>,
        processed: Mutex<Vec<Advert>>,
    }

    impl MockRouter {
        pub async fn queue_advert(&self, advert: Advert) {
            self.pending.lock().await.push_back(advert);
        }

        pub fn processed(&self) -> Vec<Advert> {
            self.processed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Router for MockRouter {
        async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        async fn next_advert(&self) -> Option<Advert> {
            loop {
                if let Some(advert) = self.pending.lock().await.pop_front() {
                    return Some(advert);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        async fn process(&self, advert: Advert) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.processed.lock().unwrap().push(advert);
            Ok(())
        }
    }
}
