use serde::Deserialize;

use boltwire_core::codec::DEFAULT_MAX_FRAME_BYTES;
use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{Framing, SerializerId};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemotingConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub client: ClientSection,

    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    #[serde(default)]
    pub protocol: ProtocolSection,

    #[serde(default)]
    pub executor: ExecutorSection,
}

impl Default for RemotingConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
            client: ClientSection::default(),
            heartbeat: HeartbeatSection::default(),
            protocol: ProtocolSection::default(),
            executor: ExecutorSection::default(),
        }
    }
}

impl RemotingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RemotingError::Config(format!("unsupported config version: {}", self.version)));
        }
        self.server.validate()?;
        self.client.validate()?;
        self.heartbeat.validate()?;
        self.protocol.validate()?;
        self.executor.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Close server-side connections idle for this long (heartbeats count).
    #[serde(default = "default_true")]
    pub idle_close: bool,

    #[serde(default = "default_server_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            idle_close: true,
            idle_timeout_ms: default_server_idle_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if !(50..=3_600_000).contains(&self.idle_timeout_ms) {
            return Err(RemotingError::Config(
                "server.idle_timeout_ms must be between 50 and 3600000".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_invoke_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            default_timeout_ms: default_invoke_timeout_ms(),
        }
    }
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=60_000).contains(&self.connect_timeout_ms) {
            return Err(RemotingError::Config(
                "client.connect_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(RemotingError::Config("client.default_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Client-side idle time (no reads or writes) before a heartbeat is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub idle_interval_ms: u64,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive unanswered heartbeats before the connection is closed.
    #[serde(default = "default_heartbeat_max_failures")]
    pub max_failures: u32,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
            max_failures: default_heartbeat_max_failures(),
        }
    }
}

impl HeartbeatSection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=600_000).contains(&self.idle_interval_ms) {
            return Err(RemotingError::Config(
                "heartbeat.idle_interval_ms must be between 10 and 600000".into(),
            ));
        }
        if !(10..=60_000).contains(&self.timeout_ms) {
            return Err(RemotingError::Config(
                "heartbeat.timeout_ms must be between 10 and 60000".into(),
            ));
        }
        if !(1..=100).contains(&self.max_failures) {
            return Err(RemotingError::Config(
                "heartbeat.max_failures must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FramingVersion {
    V1,
    #[default]
    V2,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolSection {
    #[serde(default)]
    pub version: FramingVersion,

    /// Append a CRC-32C trailer and require one on every inbound frame (protocol v2 only).
    #[serde(default)]
    pub crc: bool,

    #[serde(default = "default_serializer")]
    pub serializer: u8,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            version: FramingVersion::default(),
            crc: false,
            serializer: default_serializer(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ProtocolSection {
    pub fn validate(&self) -> Result<()> {
        if self.crc && self.version == FramingVersion::V1 {
            return Err(RemotingError::Config("protocol.crc requires protocol.version v2".into()));
        }
        if self.max_frame_bytes < 1024 {
            return Err(RemotingError::Config("protocol.max_frame_bytes must be at least 1024".into()));
        }
        Ok(())
    }

    /// Framing used for commands originated on a connection.
    pub fn framing(&self) -> Framing {
        match self.version {
            FramingVersion::V1 => Framing::V1,
            FramingVersion::V2 => Framing::v2(self.crc),
        }
    }

    pub fn serializer_id(&self) -> SerializerId {
        SerializerId(self.serializer)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Tasks admitted beyond the running ones before submissions are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Encoded frames buffered per connection ahead of the socket writer.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl ExecutorSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1024).contains(&self.worker_threads) {
            return Err(RemotingError::Config(
                "executor.worker_threads must be between 1 and 1024".into(),
            ));
        }
        if self.queue_capacity > 1_000_000 {
            return Err(RemotingError::Config("executor.queue_capacity must be at most 1000000".into()));
        }
        if self.outbound_queue == 0 {
            return Err(RemotingError::Config("executor.outbound_queue must be positive".into()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_listen() -> String {
    "127.0.0.1:12200".into()
}
fn default_server_idle_timeout_ms() -> u64 {
    90_000
}
fn default_connect_timeout_ms() -> u64 {
    1_000
}
fn default_invoke_timeout_ms() -> u64 {
    3_000
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    1_000
}
fn default_heartbeat_max_failures() -> u32 {
    3
}
fn default_serializer() -> u8 {
    SerializerId::JSON.0
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_worker_threads() -> usize {
    8
}
fn default_queue_capacity() -> usize {
    600
}
fn default_outbound_queue() -> usize {
    1024
}
