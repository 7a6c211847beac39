//! boltwire remoting runtime.
//!
//! Connections over any async byte stream, a per-connection correlation table
//! with four invocation modes (oneway, sync, future, callback), command-code
//! and class-name routing onto bounded worker pools, and a heartbeat state
//! machine. `RpcClient` and `RpcServer` are the entry points; integration
//! tests drive the same types over in-memory streams.

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod executor;
pub mod heartbeat;
pub mod invoke;
pub mod obs;
pub mod resolver;
pub mod server;
pub mod services;
pub mod timer;
pub mod transport;

pub use client::RpcClient;
pub use connection::{Connection, Role};
pub use context::RemotingContext;
pub use invoke::{callback_on, InvokeCallback, RpcRequest};
pub use resolver::{AddressResolver, Target};
pub use server::RpcServer;
