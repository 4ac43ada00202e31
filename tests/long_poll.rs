//! Half-duplex carrier: parked GETs resumed by completing batches

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swaggersocket::config::ServerConfig;
use swaggersocket::core::codec;
use swaggersocket::error::ProtocolError;
use swaggersocket::protocol::dispatcher::Dispatcher;
use swaggersocket::protocol::fanout::RequestParts;
use swaggersocket::protocol::message::{Outbound, Response, StatusMessage};
use swaggersocket::protocol::rendezvous::Resume;
use swaggersocket::protocol::session::SessionId;
use swaggersocket::transport::long_poll::LongPollEndpoint;

fn endpoint(long_poll_timeout: Duration) -> LongPollEndpoint {
    let dispatcher = Dispatcher::new(Duration::from_secs(5));
    dispatcher
        .register("GET", "/delayed", |_parts: RequestParts| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ProtocolError>(Response::ok().with_body("ready"))
        })
        .unwrap();
    let config = ServerConfig {
        long_poll_timeout,
        ..ServerConfig::default()
    };
    LongPollEndpoint::new(Arc::new(config), Arc::new(dispatcher))
}

fn status(payload: &Bytes) -> StatusMessage {
    match codec::decode_outbound(payload).unwrap() {
        Outbound::Status(status) => status,
        other => panic!("Expected status, got {other:?}"),
    }
}

fn delayed_batch(identity: &str) -> String {
    format!(r#"{{"identity":"{identity}","requests":[{{"uuid":"only","method":"GET","path":"/delayed"}}]}}"#)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parked_poll_resumed_once_with_aggregate() {
    let endpoint = endpoint(Duration::from_secs(5));
    let session = endpoint.open().await;

    let replies = endpoint
        .post(&session, br#"{"handshake":{"protocolVersion":"1.0"}}"#)
        .await
        .unwrap();
    let identity = status(&replies[0]).identity;

    let poller = {
        let endpoint = endpoint.clone();
        let session = session.clone();
        tokio::spawn(async move { endpoint.poll(&session).await })
    };
    while !endpoint.rendezvous().is_parked(&session) {
        tokio::task::yield_now().await;
    }

    let replies = endpoint
        .post(&session, delayed_batch(&identity).as_bytes())
        .await
        .unwrap();
    assert!(replies.is_empty());

    let payload = poller.await.unwrap().expect("Poll should be resumed");
    match codec::decode_outbound(&payload).unwrap() {
        Outbound::Responses(message) => {
            assert_eq!(message.identity, identity);
            assert_eq!(message.responses.len(), 1);
            assert_eq!(message.responses[0].uuid, "only");
            assert_eq!(message.responses[0].body_str(), Some("ready"));
        }
        other => panic!("unexpected {other:?}"),
    }

    // A late payload finds nothing parked
    assert!(!endpoint.rendezvous().is_parked(&session));
    assert!(matches!(
        endpoint
            .rendezvous()
            .resume(&session, Bytes::from_static(b"late")),
        Resume::Busy(_)
    ));
}

#[tokio::test]
async fn test_poll_times_out_when_nothing_completes() {
    let endpoint = endpoint(Duration::from_millis(150));
    let session = endpoint.open().await;

    let result = endpoint.poll(&session).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
    assert!(!endpoint.rendezvous().is_parked(&session));
}

#[tokio::test]
async fn test_aggregate_without_poll_is_dropped() {
    let endpoint = endpoint(Duration::from_millis(150));
    let session = endpoint.open().await;
    let replies = endpoint.post(&session, br#"{"handshake":{}}"#).await.unwrap();
    let identity = status(&replies[0]).identity;

    endpoint
        .post(&session, delayed_batch(&identity).as_bytes())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    // The batch completed while busy; the next poll sees nothing
    assert!(matches!(
        endpoint.poll(&session).await,
        Err(ProtocolError::Timeout)
    ));

    // The session is free for the next batch
    let replies = endpoint
        .post(&session, delayed_batch(&identity).as_bytes())
        .await
        .unwrap();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn test_second_poll_rejected_while_parked() {
    let endpoint = endpoint(Duration::from_secs(5));
    let session = endpoint.open().await;

    let first = {
        let endpoint = endpoint.clone();
        let session = session.clone();
        tokio::spawn(async move { endpoint.poll(&session).await })
    };
    while !endpoint.rendezvous().is_parked(&session) {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        endpoint.poll(&session).await,
        Err(ProtocolError::AlreadyParked(_))
    ));

    assert!(endpoint.close(&session).await);
    assert!(matches!(
        first.await.unwrap(),
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_unknown_session_cannot_poll() {
    let endpoint = endpoint(Duration::from_secs(1));
    let ghost = swaggersocket::protocol::session::SessionId::from("ghost");
    assert!(matches!(
        endpoint.poll(&ghost).await,
        Err(ProtocolError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_post_before_handshake_gets_501_body() {
    let endpoint = endpoint(Duration::from_secs(1));
    let session = endpoint.open().await;
    let replies = endpoint
        .post(&session, delayed_batch("nobody").as_bytes())
        .await
        .unwrap();
    let reply = status(&replies[0]);
    assert_eq!(reply.code(), 501);
    assert_eq!(reply.identity, "0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_posts_share_one_session() {
    let endpoint = endpoint(Duration::from_secs(5));
    let session = SessionId::generate();

    let mut posts = Vec::new();
    for _ in 0..4 {
        let endpoint = endpoint.clone();
        let session = session.clone();
        posts.push(tokio::spawn(async move {
            endpoint.post(&session, br#"{"handshake":{}}"#).await
        }));
    }
    let mut accepted = Vec::new();
    for post in posts {
        for reply in post.await.unwrap().unwrap() {
            accepted.push(status(&reply));
        }
    }

    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].code(), 200);
    assert_eq!(endpoint.registry().len().await, 1);
    let connection = endpoint.registry().get(&session).await.unwrap();
    assert!(!connection.is_closed());
    assert_eq!(
        connection.identity().unwrap().unwrap().as_str(),
        accepted[0].identity
    );
}
