use std::net::SocketAddr;

use async_trait::async_trait;

/// Out-of-scope collaborator: resolves a logical name to candidate addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Vec<SocketAddr>, Box<dyn std::error::Error + Send + Sync>>;
}

/// In-memory test double used by this crate's own test suite.
pub mod mock {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    pub struct MockResolver {
        addresses: Mutex<Vec<SocketAddr>>,
    }

    impl MockResolver {
        pub fn set(&self, addresses: Vec<SocketAddr>) {
            *self.addresses.lock().unwrap() = addresses;
        }
    }

    #[async_trait]
    impl Resolver for MockResolver {
        async fn resolve(&self, _name: &str) -> Result<Vec<SocketAddr>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.addresses.lock().unwrap().clone())
        }
    }
}
