use crate::message::Response;
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Calls that have been sent and are waiting for their response, by id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<i64, oneshot::Sender<Response>>,
    closed: bool,
}

impl PendingCalls {
    /// Registers `id`, or returns `None` once the connection is gone.
    pub(crate) fn insert(&self, id: i64) -> Option<oneshot::Receiver<Response>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let (response_tx, response_rx) = oneshot::channel();
        inner.calls.insert(id, response_tx);
        Some(response_rx)
    }

    /// Hands `response` to the call waiting on `id`. Returns `false` when no
    /// such call is pending (it already completed, timed out or was cancelled).
    pub(crate) fn complete(&self, id: i64, response: Response) -> bool {
        let Some(response_tx) = self.inner.lock().calls.remove(&id) else {
            return false;
        };
        // The waiter may have given up between our removal and this send.
        response_tx.send(response).is_ok()
    }

    pub(crate) fn remove(&self, id: i64) -> bool {
        self.inner.lock().calls.remove(&id).is_some()
    }

    /// Fails every pending call and refuses new ones.
    pub(crate) fn close(&self) {
        let calls = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.calls)
        };
        if !calls.is_empty() {
            tracing::debug!(count = calls.len(), "dropping pending calls");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }
}

/// Removes its id from the pending set when the waiting call ends, however it ends.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: i64,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingCalls, id: i64) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(self.id) {
            tracing::trace!(id = self.id, "removed unanswered call");
        }
    }
}
