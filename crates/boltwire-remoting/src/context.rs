//! Shared remoting state for one client or server instance.
//!
//! Owns the validated config, the serializer registry, the codec, the
//! processor registry, the default biz executor, the timer and the metrics.
//! Every connection holds an `Arc` to it.

use std::sync::{Arc, PoisonError, RwLock};

use boltwire_core::codec::CommandCodec;
use boltwire_core::error::{RemotingError, Result};
use boltwire_core::SerializerRegistry;

use crate::config::RemotingConfig;
use crate::dispatch::Dispatcher;
use crate::executor::{Executor, WorkerPool};
use crate::obs::RemotingMetrics;
use crate::timer::Timer;

pub struct RemotingContext {
    cfg: RemotingConfig,
    serializers: SerializerRegistry,
    codec: CommandCodec,
    dispatcher: Dispatcher,
    default_executor: RwLock<Arc<dyn Executor>>,
    timer: Timer,
    metrics: RemotingMetrics,
}

impl RemotingContext {
    /// Build with the default serializer set. Must be called inside a tokio runtime.
    pub fn new(cfg: RemotingConfig) -> Result<Arc<Self>> {
        Self::with_serializers(cfg, SerializerRegistry::with_defaults())
    }

    pub fn with_serializers(cfg: RemotingConfig, serializers: SerializerRegistry) -> Result<Arc<Self>> {
        cfg.validate()?;
        let default_id = cfg.protocol.serializer_id();
        if !serializers.contains(default_id) {
            return Err(RemotingError::Config(format!(
                "protocol.serializer {} is not registered",
                default_id.0
            )));
        }

        let pool = WorkerPool::new(
            "boltwire-biz",
            cfg.executor.worker_threads,
            cfg.executor.queue_capacity,
        )?;
        let timer = Timer::current()?;
        let codec = CommandCodec::new(cfg.protocol.max_frame_bytes).require_integrity(cfg.protocol.crc);

        tracing::debug!(
            framing = ?cfg.protocol.framing(),
            serializer = default_id.0,
            workers = cfg.executor.worker_threads,
            "remoting context ready"
        );

        Ok(Arc::new(Self {
            cfg,
            serializers,
            codec,
            dispatcher: Dispatcher::new(),
            default_executor: RwLock::new(Arc::new(pool)),
            timer,
            metrics: RemotingMetrics::default(),
        }))
    }

    pub fn config(&self) -> &RemotingConfig {
        &self.cfg
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    pub fn codec(&self) -> &CommandCodec {
        &self.codec
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Executor for request bodies whose user processor names none.
    pub fn default_executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.default_executor.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn register_default_executor(&self, executor: Arc<dyn Executor>) {
        tracing::info!(executor = %executor.name(), "default executor replaced");
        *self.default_executor.write().unwrap_or_else(PoisonError::into_inner) = executor;
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn metrics(&self) -> &RemotingMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for RemotingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotingContext")
            .field("framing", &self.cfg.protocol.framing())
            .field("serializers", &self.serializers)
            .finish()
    }
}
