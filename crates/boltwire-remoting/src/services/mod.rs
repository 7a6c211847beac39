//! Built-in user processors.

pub mod echo;

pub use echo::EchoProcessor;
