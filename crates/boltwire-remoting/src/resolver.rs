use std::sync::Arc;

use async_trait::async_trait;

use boltwire_core::error::Result;

use crate::connection::Connection;

/// Produces a live connection for a logical address.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, addr: &str) -> Result<Arc<Connection>>;
}

/// Where an invocation goes: a logical address, or a connection already in hand.
#[derive(Debug, Clone)]
pub enum Target {
    Addr(String),
    Conn(Arc<Connection>),
}

impl Target {
    pub async fn connection(self, resolver: &dyn AddressResolver) -> Result<Arc<Connection>> {
        match self {
            Target::Addr(addr) => resolver.resolve(&addr).await,
            Target::Conn(conn) => Ok(conn),
        }
    }
}

impl From<&str> for Target {
    fn from(addr: &str) -> Self {
        Target::Addr(addr.to_owned())
    }
}

impl From<String> for Target {
    fn from(addr: String) -> Self {
        Target::Addr(addr)
    }
}

impl From<Arc<Connection>> for Target {
    fn from(conn: Arc<Connection>) -> Self {
        Target::Conn(conn)
    }
}

impl From<&Arc<Connection>> for Target {
    fn from(conn: &Arc<Connection>) -> Self {
        Target::Conn(Arc::clone(conn))
    }
}
