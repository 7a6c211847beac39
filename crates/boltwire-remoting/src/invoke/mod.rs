//! Outbound invocation: correlation table, the four invocation modes at the
//! command level (`remoting`) and at the rpc level (`rpc`).

pub mod callback;
pub mod future;
pub mod remoting;
pub mod rpc;
pub mod table;

pub use callback::{callback_on, InvokeCallback, OnExecutor};
pub use future::ResponseFuture;
pub use rpc::{resolve_response, RpcRequest, RpcResponseFuture};
pub use table::{InvokeTable, PendingCall, ResponseCallback};
