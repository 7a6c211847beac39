//! Handle returned by future-mode invocations.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{Command, ResponseStatus};

/// Resolves to the response command (real or synthetic) for one request id.
#[derive(Debug)]
pub struct ResponseFuture {
    id: u32,
    rx: Option<oneshot::Receiver<Command>>,
    done: Option<Command>,
}

impl ResponseFuture {
    pub(crate) fn new(id: u32, rx: oneshot::Receiver<Command>) -> Self {
        Self {
            id,
            rx: Some(rx),
            done: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn dropped(&self) -> Command {
        Command::synthetic_response(
            self.id,
            ResponseStatus::ConnectionClosed,
            "pending call dropped without a response",
            None,
        )
    }

    /// Non-blocking poll.
    pub fn is_done(&mut self) -> bool {
        if self.done.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        match rx.try_recv() {
            Ok(cmd) => {
                self.done = Some(cmd);
                self.rx = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.done = Some(self.dropped());
                self.rx = None;
                true
            }
        }
    }

    /// Wait for the outcome. Always terminates: the call's own timer resolves
    /// it with `TIMEOUT` if the peer stays silent.
    pub async fn wait(mut self) -> Command {
        if let Some(cmd) = self.done.take() {
            return cmd;
        }
        match self.rx.take() {
            Some(rx) => match rx.await {
                Ok(cmd) => cmd,
                Err(_) => self.dropped(),
            },
            None => self.dropped(),
        }
    }

    /// Wait at most `limit`. Elapsing does not retire the call; the handle
    /// can be waited on again.
    pub async fn wait_timeout(&mut self, limit: Duration) -> Result<Command> {
        if let Some(cmd) = self.done.take() {
            return Ok(cmd);
        }
        let Some(rx) = self.rx.as_mut() else {
            return Ok(self.dropped());
        };
        match tokio::time::timeout(limit, rx).await {
            Ok(res) => {
                self.rx = None;
                Ok(res.unwrap_or_else(|_| self.dropped()))
            }
            Err(_) => Err(RemotingError::Timeout {
                id: self.id,
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
