//! C6: allocates request numbers, holds pending completion callbacks, and
//! resolves them as responses arrive — possibly out of order.
//!
//! Grounded on `calimero-client/src/connection.rs`'s retry bookkeeping
//! (a per-request attempt counter guarding a `HashMap`-like pending set),
//! generalized from "retry the same HTTP call" to "hold a callback until a
//! matching `r` comes back off the wire".

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::codec::ResponseStatus;
use crate::error::WebcomError;

/// A completion callback for an in-flight request. Boxed because each call
/// site closes over different context (the push key, the caller's oneshot
/// sender, etc).
pub type Completion = Box<dyn FnOnce(Result<Option<Json>, WebcomError>) + Send>;

#[derive(Default)]
pub struct RequestRegistry {
    next_id: u64,
    pending: HashMap<u64, Completion>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates the next monotonic request id. Ids are never reused for the
    /// lifetime of the registry, matching spec §3's "Request" lifetime.
    pub fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Stores `completion` to be invoked when `id`'s response arrives, or on
    /// teardown via `fail_all`.
    pub fn register(&mut self, id: u64, completion: Completion) {
        self.pending.insert(id, completion);
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Looks up `id`, removes it, and invokes its completion. A response for
    /// an id we don't recognize (already completed, or never sent) is
    /// dropped — logged by the caller, not here, to keep this module
    /// logger-agnostic.
    pub fn complete(&mut self, id: u64, status: ResponseStatus, data: Option<Json>) -> bool {
        let Some(completion) = self.pending.remove(&id) else {
            return false;
        };
        let result = match status {
            ResponseStatus::Ok => Ok(data),
            ResponseStatus::Error(e) => Err(WebcomError::Request { status: e, data }),
        };
        completion(result);
        true
    }

    /// Completes every still-pending request with `reason`, e.g. on
    /// connection loss or context close. Drains the whole pending map.
    pub fn fail_all(&mut self, reason: WebcomError) {
        for (_, completion) in self.pending.drain() {
            completion(Err(clone_error(&reason)));
        }
    }
}

/// `WebcomError` doesn't derive `Clone` (its `Request.data` field is a JSON
/// value, cheap but not worth forcing onto every variant); `fail_all` needs
/// to hand the same logical error to N callbacks, so it rebuilds it per call.
fn clone_error(e: &WebcomError) -> WebcomError {
    match e {
        WebcomError::Transport(s) => WebcomError::Transport(s.clone()),
        WebcomError::Protocol(s) => WebcomError::Protocol(s.clone()),
        WebcomError::Request { status, data } => WebcomError::Request {
            status: status.clone(),
            data: data.clone(),
        },
        WebcomError::InvalidPath(s) => WebcomError::InvalidPath(s.clone()),
        WebcomError::InvalidJson(s) => WebcomError::InvalidJson(s.clone()),
        WebcomError::ContextClosed => WebcomError::ContextClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn ids_are_monotonic_and_unique() {
        let mut reg = RequestRegistry::new();
        let ids: Vec<u64> = (0..5).map(|_| reg.allocate()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn out_of_order_responses_reach_the_right_callback() {
        let mut reg = RequestRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id1 = reg.allocate();
        let id2 = reg.allocate();

        let log1 = log.clone();
        reg.register(
            id1,
            Box::new(move |_| log1.lock().unwrap().push(("id1", id1))),
        );
        let log2 = log.clone();
        reg.register(
            id2,
            Box::new(move |_| log2.lock().unwrap().push(("id2", id2))),
        );

        reg.complete(id2, ResponseStatus::Ok, None);
        reg.complete(id1, ResponseStatus::Ok, None);

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen, vec![("id2", id2), ("id1", id1)]);
    }

    #[test]
    fn missing_id_is_dropped_not_panicked() {
        let mut reg = RequestRegistry::new();
        assert!(!reg.complete(999, ResponseStatus::Ok, None));
    }

    #[test]
    fn fail_all_completes_every_pending_request_exactly_once() {
        let mut reg = RequestRegistry::new();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let id = reg.allocate();
            let count = count.clone();
            reg.register(
                id,
                Box::new(move |result| {
                    assert!(matches!(result, Err(WebcomError::ContextClosed)));
                    *count.lock().unwrap() += 1;
                }),
            );
        }
        reg.fail_all(WebcomError::ContextClosed);
        assert_eq!(*count.lock().unwrap(), 3);
        assert_eq!(reg.pending_count(), 0);
    }
}
