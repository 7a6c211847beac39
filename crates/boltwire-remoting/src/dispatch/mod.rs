//! Inbound command routing.
//!
//! Commands are routed by command code to a [`RemotingProcessor`]; rpc
//! requests are then routed by class name to a [`UserProcessor`].

pub mod dispatcher;
pub mod processor;
pub mod rpc_request;
pub mod rpc_response;
pub mod user;

pub use dispatcher::Dispatcher;
pub use processor::{ProcessContext, RemotingProcessor};
pub use user::{BizContext, ExecutorSelector, UserProcessor};
