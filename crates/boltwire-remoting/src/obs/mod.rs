//! Observability: in-process metrics.

pub mod metrics;

pub use metrics::RemotingMetrics;
