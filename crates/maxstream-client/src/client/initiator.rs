//! Client side of one `Max` session.
//!
//! [`run`] opens a duplex session over any [`MaxChannel`] and drives it with
//! three tasks:
//!
//! - **producer**: sends the values, pausing between sends, then half-closes
//!   by dropping its end of the request stream.
//! - **consumer**: records every maximum the server reports and signals
//!   completion when the response stream ends.
//! - **watcher**: signals completion when the caller cancels or the deadline
//!   passes.
//!
//! The first completion signal wins. `run` then stops the remaining tasks,
//! joins all three, and reports the last observed maximum, including when the
//! session failed. It never waits for the producer to finish its sends once a
//! completion has arrived.

use core::time::Duration;
use maxstream_core::{
    Error,
    channel::MaxChannel,
    proto::ValueMessage,
    types::ObservedMax,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The server closed the response stream.
    EndOfStream,
    /// The caller cancelled the session.
    Cancelled,
}

/// The outcome of a session that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub observed_max: ObservedMax,
    pub values_sent: u32,
    pub termination: Termination,
}

/// A session that ended with an error, and what it had seen by then.
#[derive(Debug, thiserror::Error)]
#[error("session failed after {values_sent} values with max={observed_max}")]
pub struct SessionFailure {
    pub observed_max: ObservedMax,
    pub values_sent: u32,
    #[source]
    pub source: Error,
}

impl From<Error> for SessionFailure {
    /// A failure before anything was sent or observed.
    fn from(source: Error) -> Self {
        Self {
            observed_max: ObservedMax::new(),
            values_sent: 0,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Pause after each send.
    pub delay: Duration,
    /// Fail the session with [`Error::DeadlineExceeded`] after this long.
    pub deadline: Option<Duration>,
}

/// First-completion signal sent by the session tasks.
#[derive(Debug)]
enum Completion {
    EndOfStream,
    Cancelled,
    Failed(Error),
}

/// Values for a session of `count` sends: the i-th value (1-based) is drawn
/// uniformly from `[0, i)`.
pub fn random_values(count: u32) -> impl Iterator<Item = i32> + Send + 'static {
    (1..=count).map(|i| {
        let bound = i32::try_from(i).unwrap_or(i32::MAX);
        rand::rng().random_range(0..bound)
    })
}

/// Sends `count` random values over `channel` and returns the last maximum
/// reported by the server.
///
/// # Errors
///
/// Fails if the session cannot be opened, the channel breaks while sending or
/// receiving, or the deadline expires. The [`SessionFailure`] still carries
/// the last observed maximum. Cancellation through `cancel` is not an error;
/// the report says how the session ended.
pub async fn run<C>(
    channel: &mut C,
    count: u32,
    options: SessionOptions,
    cancel: CancellationToken,
) -> Result<SessionReport, SessionFailure>
where
    C: MaxChannel,
{
    run_with_values(channel, random_values(count), options, cancel).await
}

/// Like [`run`], sending the given values in order.
#[tracing::instrument(skip_all)]
pub async fn run_with_values<C, I>(
    channel: &mut C,
    values: I,
    options: SessionOptions,
    cancel: CancellationToken,
) -> Result<SessionReport, SessionFailure>
where
    C: MaxChannel,
    I: IntoIterator<Item = i32>,
    I::IntoIter: Send + 'static,
{
    let deadline = options.deadline.map(|d| Instant::now() + d);
    // Tells the tasks still running that the session is over. A child of
    // `cancel`, so the caller's cancellation reaches every task directly.
    let stop = cancel.child_token();

    let (value_tx, value_rx) = mpsc::channel(1);

    let inbound = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Ok(SessionReport {
                observed_max: ObservedMax::new(),
                values_sent: 0,
                termination: Termination::Cancelled,
            });
        }
        () = expired(deadline) => return Err(Error::DeadlineExceeded.into()),
        inbound = channel.open(ReceiverStream::new(value_rx)) => inbound.map_err(Error::from)?,
    };
    tracing::debug!("session open");

    // One slot per task; each sends at most once, so sends never block.
    let (done_tx, mut done_rx) = mpsc::channel(3);

    let producer = tokio::spawn(produce(
        values.into_iter(),
        value_tx,
        options.delay,
        stop.clone(),
        done_tx.clone(),
    ));
    let consumer = tokio::spawn(consume(inbound, stop.clone(), done_tx.clone()));
    let watcher = tokio::spawn(watch(cancel, deadline, stop.clone(), done_tx));

    let completion = done_rx.recv().await;
    stop.cancel();

    let (values_sent, observed_max, watched) = tokio::join!(producer, consumer, watcher);
    let values_sent = values_sent.map_err(task_failed)?;
    let observed_max = observed_max.map_err(|e| SessionFailure {
        observed_max: ObservedMax::new(),
        values_sent,
        source: task_failed(e),
    })?;
    let fail = |source: Error| SessionFailure {
        observed_max,
        values_sent,
        source,
    };
    watched.map_err(|e| fail(task_failed(e)))?;

    let termination = match completion {
        Some(Completion::EndOfStream) => Termination::EndOfStream,
        Some(Completion::Cancelled) => Termination::Cancelled,
        Some(Completion::Failed(e)) => {
            tracing::warn!(%observed_max, values_sent, "session failed: {e}");
            return Err(fail(e));
        }
        None => {
            return Err(fail(Error::ChannelError {
                context: "session tasks exited without completing".to_string(),
            }));
        }
    };

    Ok(SessionReport {
        observed_max,
        values_sent,
        termination,
    })
}

async fn produce<I>(
    values: I,
    value_tx: mpsc::Sender<ValueMessage>,
    delay: Duration,
    stop: CancellationToken,
    done_tx: mpsc::Sender<Completion>,
) -> u32
where
    I: Iterator<Item = i32>,
{
    let mut sent = 0;

    for num in values {
        let res = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            res = value_tx.send(ValueMessage { num }) => res,
        };

        if res.is_err() {
            let context = format!("request stream closed after {sent} values");
            let _ = done_tx.send(Completion::Failed(Error::ChannelError { context })).await;
            return sent;
        }

        sent += 1;
        tracing::info!("{num} sent");

        if !delay.is_zero() {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                () = sleep(delay) => {}
            }
        }
    }

    // Dropping the sender ends the request stream: the half-close.
    drop(value_tx);
    tracing::debug!(sent, "request stream closed");
    sent
}

async fn consume<S>(
    mut inbound: S,
    stop: CancellationToken,
    done_tx: mpsc::Sender<Completion>,
) -> ObservedMax
where
    S: tokio_stream::Stream<Item = core::result::Result<maxstream_core::proto::MaxMessage, tonic::Status>>
        + Unpin,
{
    let mut observed = ObservedMax::new();

    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                observed.record(msg.result);
                tracing::info!("new max {} received", msg.result);
            }
            Some(Err(status)) => {
                let _ = done_tx.send(Completion::Failed(status.into())).await;
                break;
            }
            None => {
                let _ = done_tx.send(Completion::EndOfStream).await;
                break;
            }
        }
    }

    observed
}

async fn watch(
    cancel: CancellationToken,
    deadline: Option<Instant>,
    stop: CancellationToken,
    done_tx: mpsc::Sender<Completion>,
) {
    let completion = tokio::select! {
        biased;
        () = cancel.cancelled() => Completion::Cancelled,
        () = expired(deadline) => Completion::Failed(Error::DeadlineExceeded),
        () = stop.cancelled() => return,
    };

    tracing::debug!(?completion, "session interrupted");
    let _ = done_tx.send(completion).await;
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => core::future::pending().await,
    }
}

fn task_failed(e: tokio::task::JoinError) -> Error {
    Error::ChannelError {
        context: format!("session task failed: {e}"),
    }
}
