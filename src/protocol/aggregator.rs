//! # Response Aggregator
//!
//! Scatter-gather collector for one batch. Each sub-request writes its response
//! into the slot matching its position in the original batch, then decrements a
//! shared counter. Whichever completion takes the counter from one to zero builds
//! the aggregated message, in request order, and hands it to the outlet.
//!
//! ## Concurrency
//! - Slots are `OnceLock`s: each is written at most once, by the completion that
//!   owns it. A second write is a duplicate completion and never reaches the counter.
//! - `remaining` is the only completion barrier. `AcqRel` on the decrement makes every
//!   earlier slot write visible to the completion that observes zero.
//! - The open/emitted/aborted state only moves forward, and emission requires
//!   winning the `OPEN -> EMITTED` transition, so a batch is emitted at most once.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, error, trace, warn};

use crate::core::codec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Request, Response, ResponseMessage, StatusMessage};
use crate::protocol::session::Identity;
use crate::transport::Outlet;
use crate::utils::metrics::global_metrics;

const OPEN: u8 = 0;
const EMITTED: u8 = 1;
const ABORTED: u8 = 2;

/// What a response entry is stamped with, taken from its request
#[derive(Debug, Clone)]
struct SlotOrigin {
    uuid: String,
    method: String,
    path: String,
}

/// Collection state for one dispatched batch
pub struct AggregationContext {
    identity: Identity,
    origins: Vec<SlotOrigin>,
    slots: Vec<OnceLock<Response>>,
    remaining: AtomicUsize,
    state: AtomicU8,
    outlet: Arc<dyn Outlet>,
}

impl AggregationContext {
    fn new(identity: Identity, requests: &[Request], outlet: Arc<dyn Outlet>) -> Self {
        let origins: Vec<SlotOrigin> = requests
            .iter()
            .map(|r| SlotOrigin {
                uuid: r.uuid.clone(),
                method: r.method.clone(),
                path: r.path.clone(),
            })
            .collect();
        let slots = origins.iter().map(|_| OnceLock::new()).collect();

        Self {
            identity,
            remaining: AtomicUsize::new(origins.len()),
            origins,
            slots,
            state: AtomicU8::new(OPEN),
            outlet,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn expected_count(&self) -> usize {
        self.slots.len()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Position of `uuid` in the original batch
    pub fn position(&self, uuid: &str) -> Option<usize> {
        self.origins.iter().position(|o| o.uuid == uuid)
    }

    /// Record the response for `uuid`; emits the batch when it is the last one
    pub fn complete(&self, uuid: &str, response: Response) -> Result<()> {
        let index = self
            .position(uuid)
            .ok_or_else(|| ProtocolError::UnknownCorrelation(uuid.to_string()))?;
        self.complete_at(index, response)
    }

    fn is_filled(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.get().is_some())
    }

    fn complete_at(&self, index: usize, mut response: Response) -> Result<()> {
        let (origin, slot) = match (self.origins.get(index), self.slots.get(index)) {
            (Some(origin), Some(slot)) => (origin, slot),
            _ => return Err(ProtocolError::UnknownCorrelation(index.to_string())),
        };

        if !self.is_open() {
            debug!(uuid = %origin.uuid, "Completion for a closed batch discarded");
            return Err(ProtocolError::ContextClosed);
        }

        response.uuid = origin.uuid.clone();
        response.method = origin.method.clone();
        response.path = origin.path.clone();

        if slot.set(response).is_err() {
            global_metrics().duplicate_completion();
            self.abort();
            error!(
                uuid = %origin.uuid,
                identity = %self.identity,
                "Duplicate completion, aborting batch"
            );
            return Err(ProtocolError::DuplicateCompletion(origin.uuid.clone()));
        }

        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        trace!(uuid = %origin.uuid, remaining = previous - 1, "Sub-response collected");
        if previous == 1 {
            self.emit();
        }
        Ok(())
    }

    /// Stop collecting. Returns false if the batch was already emitted or aborted.
    pub(crate) fn abort(&self) -> bool {
        self.state
            .compare_exchange(OPEN, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn emit(&self) {
        if self
            .state
            .compare_exchange(OPEN, EMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(identity = %self.identity, "Batch closed before its last completion");
            return;
        }

        let payload = match self.build().and_then(|message| codec::encode(&message)) {
            Ok(payload) => payload,
            Err(e) => {
                error!(identity = %self.identity, error = %e, "Failed to encode aggregated response");
                match codec::encode(&StatusMessage::internal_error(self.identity.as_str())) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to encode fallback status");
                        return;
                    }
                }
            }
        };

        global_metrics().response_emitted();
        debug!(
            identity = %self.identity,
            responses = self.slots.len(),
            bytes = payload.len(),
            "Delivering aggregated response"
        );
        if let Err(e) = self.outlet.deliver(payload) {
            warn!(identity = %self.identity, error = %e, "Aggregated response not delivered");
        }
    }

    fn build(&self) -> Result<ResponseMessage> {
        let responses = self
            .slots
            .iter()
            .map(|slot| {
                slot.get().cloned().ok_or_else(|| {
                    ProtocolError::Custom("Batch emitted with an empty slot".to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResponseMessage {
            identity: self.identity.as_str().to_string(),
            responses,
        })
    }
}

/// Per-sub-request back-reference into its batch.
///
/// Consumed by [`Completion::complete`], or by [`Completion::defer`] when the
/// answer will arrive by uuid through `Connection::on_sub_response_ready`. A handle
/// dropped without either fills its slot with `500 Internal Server Error`.
pub struct Completion {
    context: Arc<AggregationContext>,
    index: usize,
    done: bool,
}

impl Completion {
    pub fn uuid(&self) -> &str {
        self.context
            .origins
            .get(self.index)
            .map(|o| o.uuid.as_str())
            .unwrap_or_default()
    }

    pub fn complete(mut self, response: Response) -> Result<()> {
        self.done = true;
        self.context.complete_at(self.index, response)
    }

    /// Give up the handle without answering. The slot stays empty until the
    /// response is fed back by uuid. Returns that uuid.
    pub fn defer(mut self) -> String {
        self.done = true;
        trace!(uuid = %self.uuid(), "Completion deferred to correlation by uuid");
        self.uuid().to_string()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.done || self.context.is_filled(self.index) || !self.context.is_open() {
            return;
        }
        warn!(uuid = %self.uuid(), "Sub-request dropped without a response");
        if let Err(e) = self.context.complete_at(self.index, Response::internal_error()) {
            debug!(error = %e, "Fallback completion not recorded");
        }
    }
}

/// The single batch a connection may have in flight
#[derive(Default)]
pub(crate) struct BatchSlot {
    current: Mutex<Option<Arc<AggregationContext>>>,
}

impl BatchSlot {
    /// Register a new context and hand out one completion per request.
    ///
    /// Fails with `OverlappingBatch` while a previous batch is still open.
    pub(crate) fn open(
        &self,
        identity: Identity,
        requests: &[Request],
        outlet: Arc<dyn Outlet>,
    ) -> Result<(Arc<AggregationContext>, Vec<Completion>)> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;

        if current.as_ref().is_some_and(|ctx| ctx.is_open()) {
            return Err(ProtocolError::OverlappingBatch);
        }

        let context = Arc::new(AggregationContext::new(identity, requests, outlet));
        *current = Some(Arc::clone(&context));

        let completions = (0..requests.len())
            .map(|index| Completion {
                context: Arc::clone(&context),
                index,
                done: false,
            })
            .collect();
        Ok((context, completions))
    }

    /// The open context, if any
    pub(crate) fn current(&self) -> Option<Arc<AggregationContext>> {
        let current = self.current.lock().ok()?;
        current.as_ref().filter(|ctx| ctx.is_open()).cloned()
    }

    /// Abort the open context, discarding late completions
    pub(crate) fn abort(&self) -> bool {
        self.current().is_some_and(|ctx| ctx.abort())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::message::Outbound;
    use bytes::Bytes;

    #[derive(Default)]
    struct Capture(Mutex<Vec<Bytes>>);

    impl Outlet for Capture {
        fn deliver(&self, payload: Bytes) -> Result<()> {
            self.0.lock().unwrap().push(payload);
            Ok(())
        }
    }

    impl Capture {
        fn messages(&self) -> Vec<ResponseMessage> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|b| match codec::decode_outbound(b).unwrap() {
                    Outbound::Responses(m) => m,
                    other => panic!("unexpected {other:?}"),
                })
                .collect()
        }
    }

    fn requests(n: usize) -> Vec<Request> {
        (0..n)
            .map(|i| Request::new(format!("u{i}"), "GET", format!("/r/{i}")))
            .collect()
    }

    #[test]
    fn test_single_request_batch_emits_once() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (ctx, mut completions) = slot
            .open(Identity::generate(), &requests(1), capture.clone())
            .unwrap();
        assert_eq!(ctx.expected_count(), 1);

        completions.pop().unwrap().complete(Response::ok()).unwrap();
        assert_eq!(ctx.remaining(), 0);
        assert!(!ctx.is_open());

        let messages = capture.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].responses[0].uuid, "u0");
        assert_eq!(messages[0].responses[0].path, "/r/0");
    }

    #[test]
    fn test_reverse_completion_keeps_request_order() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (_ctx, completions) = slot
            .open(Identity::generate(), &requests(4), capture.clone())
            .unwrap();

        for completion in completions.into_iter().rev() {
            let body = completion.uuid().to_string();
            completion.complete(Response::ok().with_body(body)).unwrap();
        }

        let message = &capture.messages()[0];
        let uuids: Vec<_> = message.responses.iter().map(|r| r.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["u0", "u1", "u2", "u3"]);
        assert_eq!(message.responses[2].body_str(), Some("u2"));
    }

    #[test]
    fn test_duplicate_completion_aborts_without_emitting() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (ctx, completions) = slot
            .open(Identity::generate(), &requests(2), capture.clone())
            .unwrap();

        ctx.complete("u0", Response::ok()).unwrap();
        assert!(matches!(
            ctx.complete("u0", Response::ok()),
            Err(ProtocolError::DuplicateCompletion(uuid)) if uuid == "u0"
        ));
        assert_eq!(ctx.remaining(), 1);
        assert!(!ctx.is_open());

        drop(completions);
        assert!(capture.messages().is_empty());
    }

    #[test]
    fn test_overlapping_batch_rejected_until_emitted() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (_ctx, completions) = slot
            .open(Identity::generate(), &requests(1), capture.clone())
            .unwrap();

        assert!(matches!(
            slot.open(Identity::generate(), &requests(1), capture.clone()),
            Err(ProtocolError::OverlappingBatch)
        ));

        for c in completions {
            c.complete(Response::ok()).unwrap();
        }
        assert!(slot.current().is_none());
        assert!(slot
            .open(Identity::generate(), &requests(1), capture)
            .is_ok());
    }

    #[test]
    fn test_dropped_completion_becomes_internal_error() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (_ctx, mut completions) = slot
            .open(Identity::generate(), &requests(2), capture.clone())
            .unwrap();

        let second = completions.pop().unwrap();
        drop(completions);
        second.complete(Response::ok()).unwrap();

        let message = &capture.messages()[0];
        assert_eq!(message.responses[0].status, 500);
        assert_eq!(message.responses[0].uuid, "u0");
        assert_eq!(message.responses[1].status, 200);
    }

    #[test]
    fn test_deferred_completions_wait_for_uuid() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (ctx, completions) = slot
            .open(Identity::generate(), &requests(2), capture.clone())
            .unwrap();
        let uuids: Vec<String> = completions.into_iter().map(Completion::defer).collect();
        drop(ctx);

        assert_eq!(uuids, vec!["u0", "u1"]);
        assert!(capture.messages().is_empty());

        let open = slot.current().unwrap();
        assert_eq!(open.remaining(), 2);
        open.complete("u1", Response::ok().with_body("b")).unwrap();
        open.complete("u0", Response::ok().with_body("a")).unwrap();

        let messages = capture.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].responses[0].body_str(), Some("a"));
        assert_eq!(messages[0].responses[1].body_str(), Some("b"));
    }

    #[test]
    fn test_unknown_uuid_is_rejected() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (ctx, _completions) = slot
            .open(Identity::generate(), &requests(1), capture)
            .unwrap();
        assert!(matches!(
            ctx.complete("nope", Response::ok()),
            Err(ProtocolError::UnknownCorrelation(_))
        ));
        assert_eq!(ctx.remaining(), 1);
    }

    #[test]
    fn test_aborted_batch_discards_late_completions() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let (_ctx, completions) = slot
            .open(Identity::generate(), &requests(1), capture.clone())
            .unwrap();
        assert!(slot.abort());
        for c in completions {
            assert!(matches!(
                c.complete(Response::ok()),
                Err(ProtocolError::ContextClosed)
            ));
        }
        assert!(capture.messages().is_empty());
    }

    #[test]
    fn test_unencodable_body_answered_with_status() {
        let capture = Arc::new(Capture::default());
        let slot = BatchSlot::default();
        let identity = Identity::generate();
        let (_ctx, completions) = slot
            .open(identity.clone(), &requests(1), capture.clone())
            .unwrap();
        for c in completions {
            c.complete(Response::ok().with_body(vec![0xFF, 0xFE])).unwrap();
        }

        let payloads = capture.0.lock().unwrap();
        match codec::decode_outbound(&payloads[0]).unwrap() {
            Outbound::Status(status) => {
                assert_eq!(status.code(), 500);
                assert_eq!(status.identity, identity.as_str());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
