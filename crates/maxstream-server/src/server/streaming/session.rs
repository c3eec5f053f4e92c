use maxstream_core::{
    Error,
    proto::{MaxMessage, ValueMessage},
    types::RunningMax,
};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::server::telemetry::{
    increment_max_updates, increment_message_errors, increment_values_received,
};

/// What one finished session did, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub values_received: u64,
    pub updates_sent: u64,
    pub max: Option<i32>,
}

/// Runs the receive-evaluate-send loop for one `Max` session.
///
/// Reads values from `inbound`, folds them into a fresh [`RunningMax`], and
/// sends a [`MaxMessage`] on `resp_tx` each time the maximum strictly
/// increases. The running maximum lives on this task's stack and is dropped
/// with it.
///
/// # Termination
///
/// - `inbound` ends (the client half-closed): returns `Ok`. The caller drops
///   `resp_tx`, which closes the response stream.
/// - `cancel` fires: returns [`Error::ServiceShutdown`].
/// - `resp_tx` closes (the client abandoned the call): returns
///   [`Error::RequestCancelled`].
///
/// Cancellation is checked before every receive and every send, and wins over
/// a message that is already waiting or a response buffer that is full.
///
/// A failed receive or send is logged and the loop carries on; neither ends
/// the session.
pub async fn run_session<S>(
    mut inbound: S,
    resp_tx: mpsc::Sender<Result<MaxMessage, Status>>,
    cancel: CancellationToken,
) -> Result<SessionSummary, Error>
where
    S: Stream<Item = Result<ValueMessage, Status>> + Unpin,
{
    let mut running = RunningMax::new();
    let mut summary = SessionSummary::default();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::ServiceShutdown),
            () = resp_tx.closed() => return Err(Error::RequestCancelled),
            next = inbound.next() => next,
        };

        let msg = match next {
            None => {
                tracing::debug!(
                    values = summary.values_received,
                    updates = summary.updates_sent,
                    "client half-closed"
                );
                return Ok(summary);
            }
            Some(Err(status)) => {
                increment_message_errors();
                tracing::warn!(code = ?status.code(), "receive error: {}", status.message());
                continue;
            }
            Some(Ok(msg)) => msg,
        };

        summary.values_received += 1;
        increment_values_received();

        let Some(max) = running.observe(msg.num) else {
            continue;
        };
        summary.max = Some(max);

        // A full buffer blocks the send until the client reads, so the send
        // races cancellation too. Only a closed receiver fails it; the select
        // above turns that into `RequestCancelled` on the next iteration.
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::ServiceShutdown),
            sent = resp_tx.send(Ok(MaxMessage { result: max })) => sent,
        };
        if sent.is_err() {
            increment_message_errors();
            tracing::warn!(max, "send error: response stream closed");
            continue;
        }

        summary.updates_sent += 1;
        increment_max_updates();
        tracing::debug!(max, "sent new max");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio_stream::wrappers::ReceiverStream;

    fn values(nums: &[i32]) -> impl Stream<Item = Result<ValueMessage, Status>> + Unpin {
        tokio_stream::iter(
            nums.iter()
                .map(|&num| Ok(ValueMessage { num }))
                .collect::<Vec<_>>(),
        )
    }

    async fn drain(mut rx: mpsc::Receiver<Result<MaxMessage, Status>>) -> Vec<i32> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg.unwrap().result);
        }
        out
    }

    #[tokio::test]
    async fn emits_each_new_maximum_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let summary = run_session(
            values(&[3, 1, 4, 1, 5, 9, 2, 6]),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(drain(rx).await, vec![3, 4, 5, 9]);
        assert_eq!(
            summary,
            SessionSummary {
                values_received: 8,
                updates_sent: 4,
                max: Some(9),
            }
        );
    }

    #[tokio::test]
    async fn immediate_half_close_ends_cleanly_without_output() {
        let (tx, rx) = mpsc::channel(16);
        let summary = run_session(values(&[]), tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(drain(rx).await.is_empty());
        assert_eq!(summary, SessionSummary::default());
    }

    #[tokio::test]
    async fn receive_error_does_not_end_the_session() {
        let inbound = tokio_stream::iter(vec![
            Ok(ValueMessage { num: 2 }),
            Err(Status::data_loss("corrupt frame")),
            Ok(ValueMessage { num: 7 }),
        ]);
        let (tx, rx) = mpsc::channel(16);
        let summary = run_session(inbound, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(drain(rx).await, vec![2, 7]);
        assert_eq!(summary.values_received, 2);
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_messages() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, rx) = mpsc::channel(16);

        let err = run_session(values(&[1, 2, 3]), tx, cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ServiceShutdown), "{err}");
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_receive() {
        let (_value_tx, value_rx) = mpsc::channel::<Result<ValueMessage, Status>>(1);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let session = tokio::spawn(run_session(
            ReceiverStream::new(value_rx),
            tx,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown), "{err}");
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_send() {
        // Room for one update; the second blocks because nobody reads.
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let session = tokio::spawn(run_session(values(&[1, 2]), tx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_finished());
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session ignored cancellation while blocked on send")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown), "{err}");
    }

    #[tokio::test]
    async fn abandoned_response_stream_cancels_the_session() {
        let (value_tx, value_rx) = mpsc::channel(1);
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        value_tx.send(Ok(ValueMessage { num: 1 })).await.unwrap();
        let err = run_session(ReceiverStream::new(value_rx), tx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RequestCancelled), "{err}");
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_separate_maxima() {
        let (tx_a, rx_a) = mpsc::channel(16);
        let (tx_b, rx_b) = mpsc::channel(16);

        let (a, b) = tokio::join!(
            run_session(values(&[10, 20, 5]), tx_a, CancellationToken::new()),
            run_session(values(&[1, 2, 3]), tx_b, CancellationToken::new()),
        );

        assert_eq!(a.unwrap().max, Some(20));
        assert_eq!(b.unwrap().max, Some(3));
        assert_eq!(drain(rx_a).await, vec![10, 20]);
        assert_eq!(drain(rx_b).await, vec![1, 2, 3]);
    }
}
