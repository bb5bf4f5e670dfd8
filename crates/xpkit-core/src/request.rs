// ── Request correlation ──
//
// Outbound operations get a strictly increasing request id; responses
// are matched back by that id and fulfill a oneshot the caller may
// await. Ids are unique for the lifetime of a connection and reset on
// full reconnect.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};
use xpkit_api::wire::{WsOperation, WsResult};

use crate::error::CoreError;

struct Pending {
    op: WsOperation,
    tx: oneshot::Sender<Result<(), CoreError>>,
}

/// Handle for one in-flight request.
///
/// Await [`result`](Self::result) for the simulator's acknowledgment,
/// or drop the handle for fire-and-forget semantics (the response is
/// still logged through the default feedback path).
pub struct RequestHandle {
    id: u64,
    rx: oneshot::Receiver<Result<(), CoreError>>,
}

impl RequestHandle {
    /// The wire request id this handle is waiting on.
    pub fn request_id(&self) -> u64 {
        self.id
    }

    /// Wait for the simulator's acknowledgment.
    pub async fn result(self) -> Result<(), CoreError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(CoreError::ConnectionLost))
    }

    /// Wait for the acknowledgment, giving up after `timeout`.
    pub async fn result_timeout(self, timeout: Duration) -> Result<(), CoreError> {
        match tokio::time::timeout(timeout, self.result()).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

/// Pending request table for one connection.
#[derive(Default)]
pub(crate) struct RequestTable {
    next_id: u64,
    pending: HashMap<u64, Pending>,
}

impl RequestTable {
    /// Allocate the next request id and register a pending slot for it.
    pub fn register(&mut self, op: WsOperation) -> (u64, RequestHandle) {
        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending { op, tx });
        (id, RequestHandle { id, rx })
    }

    /// Fulfill the pending request matching a `result` frame.
    ///
    /// Returns the operation kind when a pending request matched;
    /// responses with no match are logged and dropped, the simulator
    /// reuses the envelope shape for frames this client never asked for.
    pub fn resolve(&mut self, response: &WsResult) -> Option<WsOperation> {
        let Some(pending) = self.pending.remove(&response.req_id) else {
            debug!(req_id = response.req_id, "response with no pending request, dropping");
            return None;
        };

        // Default feedback path, also covers dropped handles.
        let result = if response.success {
            debug!(req_id = response.req_id, op = %pending.op, "request succeeded");
            Ok(())
        } else {
            let message = response
                .error_message
                .clone()
                .unwrap_or_else(|| "no error message".into());
            warn!(
                req_id = response.req_id,
                op = %pending.op,
                code = response.error_code.as_deref().unwrap_or("no error code"),
                "request failed: {message}"
            );
            Err(CoreError::Request {
                message,
                code: response.error_code.clone(),
            })
        };

        // The caller may have dropped its handle; that is fine.
        let _ = pending.tx.send(result);
        Some(pending.op)
    }

    /// Drop a pending slot whose frame never made it onto the wire.
    pub fn abandon(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Resolve every outstanding request with a connection-lost error.
    pub fn cancel_all(&mut self) {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(CoreError::ConnectionLost));
        }
        if count > 0 {
            debug!(count, "cancelled pending requests");
        }
    }

    /// Full reset for a new connection: cancel leftovers and restart the
    /// id sequence.
    pub fn reset(&mut self) {
        self.cancel_all();
        self.next_id = 0;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(req_id: u64) -> WsResult {
        WsResult {
            req_id,
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    #[test]
    fn ids_strictly_increase() {
        let mut table = RequestTable::default();
        let ids: Vec<u64> = (0..5)
            .map(|_| table.register(WsOperation::DatarefSubscribeValues).0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn ids_restart_after_reset() {
        let mut table = RequestTable::default();
        table.register(WsOperation::DatarefSubscribeValues);
        table.register(WsOperation::DatarefSubscribeValues);
        table.reset();
        assert_eq!(table.len(), 0);
        let (id, _handle) = table.register(WsOperation::DatarefSubscribeValues);
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn resolve_fulfills_the_matching_handle() {
        let mut table = RequestTable::default();
        let (id, handle) = table.register(WsOperation::CommandSetIsActive);

        let op = table.resolve(&ok_response(id));
        assert_eq!(op, Some(WsOperation::CommandSetIsActive));
        assert_eq!(table.len(), 0);
        assert!(handle.result().await.is_ok());
    }

    #[tokio::test]
    async fn failure_surfaces_only_to_the_awaiting_caller() {
        let mut table = RequestTable::default();
        let (id_a, handle_a) = table.register(WsOperation::DatarefSubscribeValues);
        let (_id_b, handle_b) = table.register(WsOperation::DatarefSubscribeValues);

        table.resolve(&WsResult {
            req_id: id_a,
            success: false,
            error_code: Some("NOT_FOUND".into()),
            error_message: Some("no such dataref".into()),
        });

        match handle_a.result().await {
            Err(CoreError::Request { message, code }) => {
                assert_eq!(message, "no such dataref");
                assert_eq!(code.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("expected request error, got {other:?}"),
        }

        // the other request is untouched
        assert_eq!(table.len(), 1);
        drop(handle_b);
    }

    #[test]
    fn unmatched_response_is_dropped() {
        let mut table = RequestTable::default();
        table.register(WsOperation::DatarefSubscribeValues);
        assert_eq!(table.resolve(&ok_response(999)), None);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_pending_with_connection_lost() {
        let mut table = RequestTable::default();
        let handles: Vec<RequestHandle> = (0..4)
            .map(|_| table.register(WsOperation::DatarefSubscribeValues).1)
            .collect();

        table.cancel_all();
        assert_eq!(table.len(), 0);

        for handle in handles {
            assert!(matches!(
                handle.result().await,
                Err(CoreError::ConnectionLost)
            ));
        }
    }

    #[tokio::test]
    async fn dropped_table_means_connection_lost() {
        let mut table = RequestTable::default();
        let (_, handle) = table.register(WsOperation::DatarefSubscribeValues);
        drop(table);
        assert!(matches!(
            handle.result().await,
            Err(CoreError::ConnectionLost)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn result_timeout_expires() {
        let mut table = RequestTable::default();
        let (_, handle) = table.register(WsOperation::DatarefSubscribeValues);

        let result = handle.result_timeout(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CoreError::Timeout { timeout_secs: 5 })));
        drop(table);
    }
}
