use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use krpc_encoding::Envelope;

use crate::errors::{Error, Result};
use crate::transport::active_transactions::{ActiveTransactions, PollOutcome};
use crate::transport::messages::TransactionId;

/// Resolves once the correlator fulfils `tid`, or once it is marked timed
/// out by the main loop's sweep. Polling after resolution is not supported
/// (the entry is removed from the map on first resolution).
pub struct ResponseFuture {
    tid: TransactionId,
    active: ActiveTransactions,
}

impl ResponseFuture {
    pub fn new(tid: TransactionId, active: ActiveTransactions) -> ResponseFuture {
        ResponseFuture { tid, active }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Envelope>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.active.poll(self.tid, cx.waker()) {
            None => Poll::Pending,
            Some(PollOutcome::Ready(envelope)) => Poll::Ready(Ok(envelope)),
            Some(PollOutcome::TimedOut) => Poll::Ready(Err(Error::Timeout)),
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.active.drop_transaction(&self.tid);
    }
}
