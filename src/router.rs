use crate::{
    message::{ProtocolError, RequestId, Response},
    pending::PendingCalls,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Feeds data arriving on a transport into the calls waiting for it.
///
/// The transport may carry other traffic too: anything that does not look
/// like a JSON-RPC response, or fails to decode as one, is dropped.
#[derive(Clone)]
pub struct ResponseRouter {
    pending: Arc<PendingCalls>,
    unsolicited: Option<mpsc::UnboundedSender<ProtocolError>>,
}

impl ResponseRouter {
    pub(crate) fn new(
        pending: Arc<PendingCalls>,
        unsolicited: Option<mpsc::UnboundedSender<ProtocolError>>,
    ) -> Self {
        Self {
            pending,
            unsolicited,
        }
    }

    pub fn on_data_received(&self, raw: &str) {
        if !looks_like_response(raw) {
            return;
        }
        let response: Response = match serde_json::from_str(raw) {
            Ok(response) => response,
            Err(err) => {
                tracing::trace!(%err, "ignoring undecodable payload");
                return;
            }
        };
        tracing::trace!(
            id = ?response.id,
            has_result = response.result.is_some(),
            has_error = response.error.is_some(),
            "Handling response"
        );

        match response.id.clone() {
            Some(RequestId::Number(id)) => {
                if !self.pending.complete(id, response) {
                    tracing::warn!(id, "received response for unknown id, no pending call found");
                }
            }
            Some(id @ RequestId::String(_)) => {
                tracing::warn!(%id, "received response for an id this client never issues");
            }
            None => self.unsolicited(response),
        }
    }

    /// Fails every pending call; used when the transport goes away.
    pub fn close(&self) {
        self.pending.close();
    }

    fn unsolicited(&self, response: Response) {
        let Some(error) = response.error else {
            tracing::trace!("ignoring response without id or error");
            return;
        };
        tracing::warn!(
            code = error.code,
            error_message = %error.message,
            data = ?error.data,
            "server sent an error without id"
        );
        if let Some(error_tx) = &self.unsolicited {
            // Nobody listening is fine.
            let _ = error_tx.send(error);
        }
    }
}

/// Cheap check before paying for a full decode.
fn looks_like_response(raw: &str) -> bool {
    raw.contains("\"result\"") || raw.contains("\"error\"")
}
