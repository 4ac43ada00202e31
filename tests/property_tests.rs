//! Property-based tests using proptest
//!
//! These tests validate the ordering and exactly-once guarantees of aggregation
//! and the wire round-trip of every message kind, across randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proptest::prelude::*;
use swaggersocket::config::ServerConfig;
use swaggersocket::core::codec;
use swaggersocket::protocol::connection::Connection;
use swaggersocket::protocol::fanout::SubRequest;
use swaggersocket::protocol::message::{
    Batch, Header, Outbound, QueryParams, Request, Response, ResponseMessage, StatusMessage,
};
use swaggersocket::protocol::session::SessionId;
use tokio::sync::mpsc::UnboundedReceiver;

type Held = Arc<Mutex<Vec<SubRequest>>>;

fn established() -> (Connection, Held, UnboundedReceiver<Bytes>, String) {
    let held: Held = Arc::default();
    let sink = Arc::clone(&held);
    let dispatcher = Arc::new(move |sub: SubRequest| sink.lock().unwrap().push(sub));
    let (conn, rx) = Connection::with_channel(
        SessionId::generate(),
        Arc::new(ServerConfig::default()),
        dispatcher,
    );
    let identity = conn.on_inbound_message(br#"{"handshake":{}}"#).unwrap().replies[0]
        .identity
        .clone();
    (conn, held, rx, identity)
}

fn batch_of(identity: &str, size: usize) -> Batch {
    Batch {
        identity: identity.to_string(),
        requests: (0..size)
            .map(|i| Request::new(format!("u{i}"), "GET", format!("/r/{i}")))
            .collect(),
    }
}

fn arb_header() -> impl Strategy<Value = Header> {
    ("[A-Za-z-]{1,12}", "[ -~]{0,16}").prop_map(|(name, value)| Header::new(name, value))
}

fn arb_query() -> impl Strategy<Value = QueryParams> {
    prop::collection::vec(("[a-c]", "[a-z0-9]{0,6}"), 0..6)
        .prop_map(|pairs| pairs.into_iter().collect())
}

fn arb_request(index: usize) -> impl Strategy<Value = Request> {
    (
        prop::sample::select(vec!["GET", "POST", "PUT", "DELETE"]),
        "/[a-z0-9/ ]{0,24}",
        prop::collection::vec(arb_header(), 0..4),
        arb_query(),
        prop::option::of("\\PC{0,40}"),
    )
        .prop_map(move |(method, path, headers, query, body)| {
            let mut request = Request::new(format!("uuid-{index}"), method, path);
            request.headers = headers;
            request.query = query;
            request.body = body.map(Bytes::from);
            request
        })
}

fn arb_batch() -> impl Strategy<Value = Batch> {
    (1usize..6)
        .prop_flat_map(|n| (0..n).map(arb_request).collect::<Vec<_>>())
        .prop_map(|requests| Batch {
            identity: "id".into(),
            requests,
        })
}

fn arb_response() -> impl Strategy<Value = Response> {
    (
        "[a-z0-9-]{1,12}",
        100u16..600,
        "[A-Za-z ]{0,20}",
        prop::collection::vec(arb_header(), 0..3),
        prop::option::of("\\PC{0,40}"),
    )
        .prop_map(|(uuid, status, reason, headers, body)| {
            let mut response = Response::new(status, reason);
            response.uuid = uuid;
            response.method = "GET".into();
            response.path = "/x".into();
            response.headers = headers;
            response.body = body.map(Bytes::from);
            response
        })
}

// Property: any completion order yields responses in request order, emitted once
proptest! {
    #[test]
    fn prop_completion_order_never_changes_output_order(
        order in (1usize..24).prop_flat_map(|n| Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
    ) {
        let (conn, held, mut rx, identity) = established();
        let payload = codec::encode(&batch_of(&identity, order.len())).unwrap();
        conn.on_inbound_message(&payload).unwrap();

        let mut subs: Vec<Option<SubRequest>> =
            std::mem::take(&mut *held.lock().unwrap()).into_iter().map(Some).collect();
        for (step, &index) in order.iter().enumerate() {
            prop_assert!(rx.try_recv().is_err(), "emitted after {} completions", step);
            let sub = subs[index].take().unwrap();
            sub.complete(Response::ok().with_body(format!("body-{index}"))).unwrap();
        }

        let message = match codec::decode_outbound(&rx.try_recv().unwrap()).unwrap() {
            Outbound::Responses(message) => message,
            other => panic!("unexpected {other:?}"),
        };
        prop_assert_eq!(message.responses.len(), order.len());
        for (i, response) in message.responses.iter().enumerate() {
            prop_assert_eq!(&response.uuid, &format!("u{i}"));
            let expected = format!("body-{i}");
            prop_assert_eq!(response.body_str(), Some(expected.as_str()));
        }
        prop_assert!(rx.try_recv().is_err());
    }
}

// Property: a batch under any foreign identity never reaches the dispatcher
proptest! {
    #[test]
    fn prop_foreign_identity_never_dispatched(foreign in "[a-zA-Z0-9-]{0,40}") {
        let (conn, held, mut rx, identity) = established();
        prop_assume!(foreign != identity);

        let payload = codec::encode(&batch_of(&foreign, 3)).unwrap();
        let outcome = conn.on_inbound_message(&payload).unwrap();

        prop_assert_eq!(outcome.replies.len(), 1);
        prop_assert_eq!(outcome.replies[0].code(), 503);
        prop_assert_eq!(&outcome.replies[0].identity, &identity);
        prop_assert_eq!(outcome.dispatched, 0);
        prop_assert!(held.lock().unwrap().is_empty());
        prop_assert!(rx.try_recv().is_err());
    }
}

// Property: batches survive encode then decode field for field
proptest! {
    #[test]
    fn prop_batch_roundtrip(batch in arb_batch()) {
        let bytes = codec::encode(&batch).unwrap();
        let decoded = codec::decode_batch(&bytes).expect("Well-formed batch should decode");
        prop_assert_eq!(decoded, batch);
    }
}

// Property: aggregated and status messages survive encode then decode
proptest! {
    #[test]
    fn prop_outbound_roundtrip(
        responses in prop::collection::vec(arb_response(), 1..5),
        code in 100u16..600,
        identity in "[a-z0-9-]{1,36}",
    ) {
        let message = ResponseMessage { identity: identity.clone(), responses };
        match codec::decode_outbound(&codec::encode(&message).unwrap()).unwrap() {
            Outbound::Responses(decoded) => prop_assert_eq!(decoded, message),
            other => panic!("unexpected {other:?}"),
        }

        let status = StatusMessage::new(code, "reason", identity);
        match codec::decode_outbound(&codec::encode(&status).unwrap()).unwrap() {
            Outbound::Status(decoded) => prop_assert_eq!(decoded, status),
            other => panic!("unexpected {other:?}"),
        }
    }
}

// Property: arbitrary bytes never panic the decoder or the state machine
proptest! {
    #[test]
    fn prop_arbitrary_input_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_inbound(&data);
        let (conn, _held, _rx, _identity) = established();
        let outcome = conn.on_inbound_message(&data);
        prop_assert!(outcome.is_ok());
    }
}
