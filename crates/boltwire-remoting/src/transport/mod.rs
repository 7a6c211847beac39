//! Transport layer: turns any async byte stream (TCP, or an in-memory duplex
//! in tests) into a driven [`Connection`](crate::connection::Connection).

pub mod driver;

pub use driver::spawn_connection;
