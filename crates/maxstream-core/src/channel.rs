//! The duplex channel a client session runs over.
//!
//! [`MaxChannel`] is the seam between session logic and the transport: given
//! the outbound stream of values, it opens one `Max` call and hands back the
//! inbound stream of maxima. The outbound stream ending is the client's
//! half-close. The inbound stream ending is the server closing its side.
//!
//! The production implementation is the generated [`MathClient`]; tests can
//! substitute an in-process responder.

use crate::proto::{MaxMessage, ValueMessage, math_client::MathClient};
use core::future::Future;
use futures::Stream;
use tonic::{Status, Streaming, transport::Channel};

pub trait MaxChannel {
    /// Stream of maxima reported by the server.
    type Inbound: Stream<Item = Result<MaxMessage, Status>> + Send + Unpin + 'static;

    /// Opens one duplex `Max` session.
    ///
    /// # Errors
    ///
    /// Returns the status the transport or server produced if the call could
    /// not be started.
    fn open<S>(&mut self, outbound: S) -> impl Future<Output = Result<Self::Inbound, Status>> + Send
    where
        S: Stream<Item = ValueMessage> + Send + 'static;
}

impl MaxChannel for MathClient<Channel> {
    type Inbound = Streaming<MaxMessage>;

    async fn open<S>(&mut self, outbound: S) -> Result<Self::Inbound, Status>
    where
        S: Stream<Item = ValueMessage> + Send + 'static,
    {
        let response = self.max(outbound).await?;
        Ok(response.into_inner())
    }
}
