//! gRPC service implementation for the running-maximum stream.
//!
//! This module defines [`MaxService`], the implementation of the [`Math`]
//! service from the protobuf definition. Every `Max` call is an independent
//! duplex session driven by [`run_session`] on its own task.
//!
//! ## Responsibilities
//!
//! - Accept a session and spawn its receive-evaluate-send loop.
//! - Bridge the loop's output into the gRPC response stream.
//! - Surface session-fatal errors to the client where it is still listening.
//! - Refuse new sessions and cancel live ones during graceful shutdown.

use crate::server::{
    config::ServerConfig,
    streaming::session::run_session,
    telemetry::{
        decrement_sessions_inflight, increment_session_errors, increment_sessions,
        increment_sessions_inflight, record_session_duration,
    },
};
use core::pin::Pin;
use maxstream_core::{
    Error,
    proto::{MaxMessage, ValueMessage, math_server::Math},
};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

/// Streams back the running maximum of each client's values.
///
/// Clones share the shutdown token and the session tracker, nothing else.
/// Session state is created inside each spawned session task.
#[derive(Clone)]
pub struct MaxService {
    config: ServerConfig,
    shutdown_token: CancellationToken,
    sessions: TaskTracker,
}

impl MaxService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            shutdown_token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Gracefully shuts the service down.
    ///
    /// New sessions are refused immediately. Live sessions get up to
    /// `shutdown_timeout` to finish on their own, then are cancelled and
    /// awaited for the same period again.
    pub async fn shutdown(&self) -> Result<(), Error> {
        tracing::info!("Refusing new sessions");
        self.sessions.close();

        tracing::info!("Draining live sessions ({} active)", self.sessions.len());
        if timeout(self.config.shutdown_timeout, self.sessions.wait())
            .await
            .is_ok()
        {
            tracing::debug!("All sessions finished");
            return Ok(());
        }

        tracing::warn!(
            "Graceful drain timed out, cancelling {} sessions",
            self.sessions.len()
        );
        self.shutdown_token.cancel();

        if timeout(self.config.shutdown_timeout, self.sessions.wait())
            .await
            .is_err()
        {
            tracing::warn!("{} sessions ignored cancellation", self.sessions.len());
            return Err(Error::ChannelError {
                context: "sessions did not stop after cancellation".to_string(),
            });
        }

        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

#[tonic::async_trait]
impl Math for MaxService {
    type MaxStream = Pin<Box<dyn Stream<Item = Result<MaxMessage, Status>> + Send>>;

    /// Accepts one duplex session.
    ///
    /// Returns the response stream immediately and runs the session on a
    /// tracked task, so the client sees headers before its first value.
    #[tracing::instrument(skip_all, fields(peer = ?req.remote_addr()))]
    async fn max(
        &self,
        req: Request<Streaming<ValueMessage>>,
    ) -> Result<Response<Self::MaxStream>, Status> {
        if self.sessions.is_closed() {
            increment_session_errors();
            return Err(Error::ServiceShutdown.into());
        }

        let start = Instant::now();
        increment_sessions();
        increment_sessions_inflight();

        let inbound = req.into_inner();
        let (resp_tx, resp_rx) = mpsc::channel(self.config.stream_buffer_size);
        let cancel = self.shutdown_token.child_token();

        let fut = async move {
            tracing::info!("start new session");

            match run_session(inbound, resp_tx.clone(), cancel).await {
                Ok(summary) => {
                    tracing::info!(
                        values = summary.values_received,
                        updates = summary.updates_sent,
                        max = ?summary.max,
                        "session finished"
                    );
                }
                Err(Error::RequestCancelled) => {
                    increment_session_errors();
                    tracing::info!("client abandoned the session");
                }
                Err(e) => {
                    increment_session_errors();
                    tracing::warn!("session ended: {e}");
                    // Best effort: the client may be gone or not reading, and a
                    // full buffer must not hold up shutdown.
                    if resp_tx.try_send(Err(e.into())).is_err() {
                        tracing::debug!("failed to forward session error to client");
                    }
                }
            }

            decrement_sessions_inflight();
            record_session_duration(start.elapsed().as_secs_f64() * 1000.0);
        };

        self.sessions
            .spawn(fut.instrument(tracing::info_span!("session")));

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }
}
