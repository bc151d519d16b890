mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use wamplink::{
    auth::{
        Authentication,
        ChallengeResponse,
    },
    core::{
        error::HandshakeError,
        id::Id,
        types::Dictionary,
    },
    peer::{
        new_web_socket_peer,
        PeerConfig,
        WebSocketPeer,
    },
};

use crate::common::MockRouter;

async fn connected_peer(config: PeerConfig) -> (WebSocketPeer, MockRouter) {
    let (transport, router) = common::mock_connection();
    let mut peer = new_web_socket_peer(config).unwrap();
    peer.direct_connect(transport).await.unwrap();
    (peer, router)
}

#[tokio::test]
async fn establishes_session_without_auth() {
    common::setup_test_environment();

    let (peer, mut router) = connected_peer(PeerConfig::default()).await;

    let (result, hello) = tokio::join!(peer.join_realm("fakeRealm"), async {
        let hello = router.next_frame().await;
        router.send(r#"[2,123,{}]"#);
        hello
    });

    assert_matches::assert_matches!(result, Ok(()));
    assert_eq!(
        peer.current_session_id().await,
        Some(Id::try_from(123).unwrap())
    );
    pretty_assertions::assert_eq!(
        hello,
        json!([1, "fakeRealm", {
            "roles": {
                "caller": {
                    "features": {
                        "progressive_call_results": true,
                        "call_canceling": true,
                    },
                },
                "callee": {
                    "features": {
                        "progressive_call_results": true,
                        "call_canceling": true,
                    },
                },
                "subscriber": {},
                "publisher": {},
            },
        }])
    );
}

#[tokio::test]
async fn establishes_session_with_ticket_auth() {
    common::setup_test_environment();

    let responder = |method: &str, extra: &Dictionary| -> Result<ChallengeResponse> {
        assert_eq!(method, "ticket");
        assert_eq!(
            extra.get("somethingExtra").and_then(|value| value.string()),
            Some("extra value")
        );
        Ok(ChallengeResponse::new("some ticket"))
    };
    let mut config = PeerConfig::default();
    config.authentication = Some(Authentication {
        id: "myId".to_owned(),
        methods: Vec::from_iter(["ticket".to_owned()]),
        responder: Arc::new(responder),
    });
    let (peer, mut router) = connected_peer(config).await;

    let (result, frames) = tokio::join!(peer.join_realm("fakeRealm"), async {
        let hello = router.next_frame().await;
        router.send(r#"[4,"ticket",{"somethingExtra":"extra value"}]"#);
        let authenticate = router.next_frame().await;
        router.send(r#"[2,123,{}]"#);
        (hello, authenticate)
    });

    assert_matches::assert_matches!(result, Ok(()));
    let (hello, authenticate) = frames;
    assert_eq!(hello[1], json!("fakeRealm"));
    assert_eq!(hello[2]["authid"], json!("myId"));
    assert_eq!(hello[2]["authmethods"], json!(["ticket"]));
    assert!(hello[2]["roles"].is_object());
    pretty_assertions::assert_eq!(authenticate, json!([5, "some ticket", {}]));
}

#[tokio::test]
async fn fails_handshake_on_abort() {
    common::setup_test_environment();

    let (peer, mut router) = connected_peer(PeerConfig::default()).await;

    let (result, ()) = tokio::join!(peer.join_realm("fakeRealm"), async {
        router.next_frame().await;
        router.send(r#"[3,{"message":"no such realm"},"wamp.error.no_such_realm"]"#);
    });

    assert_matches::assert_matches!(result, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<HandshakeError>(),
            Some(HandshakeError::Aborted { reason, .. }) => {
                assert_eq!(reason.as_ref(), "wamp.error.no_such_realm");
            }
        );
    });
}

#[tokio::test]
async fn fails_handshake_on_unexpected_challenge() {
    common::setup_test_environment();

    let (peer, mut router) = connected_peer(PeerConfig::default()).await;

    let (result, abort) = tokio::join!(peer.join_realm("fakeRealm"), async {
        router.next_frame().await;
        router.send(r#"[4,"ticket",{}]"#);
        router.next_frame().await
    });

    assert_matches::assert_matches!(result, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<HandshakeError>(),
            Some(HandshakeError::UnexpectedChallenge)
        );
    });
    assert_eq!(abort[0], json!(3));
    assert_eq!(abort[2], json!("wamp.error.unexpected_challenge"));
}

#[tokio::test]
async fn server_may_challenge_multiple_times() {
    common::setup_test_environment();

    let responder = |_: &str, extra: &Dictionary| -> Result<ChallengeResponse> {
        match extra.get("round").and_then(|value| value.integer()) {
            Some(round) => Ok(ChallengeResponse::new(format!("ticket {round}"))),
            None => Ok(ChallengeResponse::new("ticket")),
        }
    };
    let mut config = PeerConfig::default();
    config.authentication = Some(Authentication {
        id: "myId".to_owned(),
        methods: Vec::from_iter(["ticket".to_owned()]),
        responder: Arc::new(responder),
    });
    let (peer, mut router) = connected_peer(config).await;

    let (result, frames) = tokio::join!(peer.join_realm("fakeRealm"), async {
        router.next_frame().await;
        router.send(r#"[4,"ticket",{"round":1}]"#);
        let first = router.next_frame().await;
        router.send(r#"[4,"ticket",{"round":2}]"#);
        let second = router.next_frame().await;
        router.send(r#"[2,123,{}]"#);
        (first, second)
    });

    assert_matches::assert_matches!(result, Ok(()));
    let (first, second) = frames;
    pretty_assertions::assert_eq!(first, json!([5, "ticket 1", {}]));
    pretty_assertions::assert_eq!(second, json!([5, "ticket 2", {}]));
}
