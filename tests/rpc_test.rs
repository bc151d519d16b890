mod common;

use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use futures_util::StreamExt;
use wamplink::{
    core::{
        cancel::CallCancelMode,
        error::{
            TransportError,
            WampError,
        },
        id::Id,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    peer::{
        new_web_socket_peer,
        Invocation,
        PayloadStream,
        PeerConfig,
        RpcCall,
        RpcResult,
        RpcYield,
        WebSocketPeer,
    },
};

use crate::common::MockRouter;

async fn established_peer(seed: u64) -> (WebSocketPeer, MockRouter) {
    common::setup_test_environment();
    let mut config = PeerConfig::default();
    config.request_id_seed = Some(seed);
    let (transport, mut router) = common::mock_connection();
    let mut peer = new_web_socket_peer(config).unwrap();
    peer.direct_connect(transport).await.unwrap();

    let (result, ()) = tokio::join!(peer.join_realm("fakeRealm"), async {
        router.next_frame().await;
        router.send(r#"[2,123,{}]"#);
    });
    result.unwrap();
    (peer, router)
}

#[tokio::test]
async fn caller_receives_progressive_results_in_order() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(
            Uri::try_from("thing").unwrap(),
            RpcCall {
                arguments: List::from_iter([Value::String("I'm calling you".to_owned())]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        router.next_frame_text().await,
        r#"[48,101,{"receive_progress":true},"thing",["I'm calling you"]]"#
    );

    router.send(r#"[50,101,{"progress":true},["Let me process that..."]]"#);
    router.send(r#"[50,101,{"progress":true},[1]]"#);
    router.send(r#"[50,101,{"progress":true},[2]]"#);
    router.send(r#"[50,101,{"progress":true},[3]]"#);
    router.send(r#"[50,101,{},["Done!"]]"#);

    let mut payloads = Vec::new();
    while let Some(result) = rpc.next_result().await {
        payloads.push(result.unwrap());
    }
    pretty_assertions::assert_eq!(
        payloads,
        Vec::from_iter([
            RpcResult {
                arguments: List::from_iter([Value::String("Let me process that...".to_owned())]),
                ..Default::default()
            },
            RpcResult {
                arguments: List::from_iter([Value::Integer(1)]),
                ..Default::default()
            },
            RpcResult {
                arguments: List::from_iter([Value::Integer(2)]),
                ..Default::default()
            },
            RpcResult {
                arguments: List::from_iter([Value::Integer(3)]),
                ..Default::default()
            },
            RpcResult {
                arguments: List::from_iter([Value::String("Done!".to_owned())]),
                ..Default::default()
            },
        ])
    );

    // The call terminated normally, so releasing it sends no CANCEL.
    drop(rpc);
    router.expect_no_frame().await;
}

#[tokio::test]
async fn releasing_pending_call_sends_cancel() {
    let (peer, mut router) = established_peer(101).await;

    let rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    assert_eq!(
        router.next_frame_text().await,
        r#"[48,101,{"receive_progress":true},"thing"]"#
    );

    drop(rpc);
    assert_eq!(router.next_frame_text().await, r#"[49,101,{"mode":"kill"}]"#);
}

#[tokio::test]
async fn explicit_cancel_is_sent_once() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    router.next_frame().await;

    rpc.cancel(CallCancelMode::Kill);
    drop(rpc);
    assert_eq!(router.next_frame_text().await, r#"[49,101,{"mode":"kill"}]"#);
    router.expect_no_frame().await;
}

#[tokio::test]
async fn terminal_result_without_payload_is_completion_only() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    router.next_frame().await;

    router.send(r#"[50,101,{"progress":true},[1]]"#);
    router.send(r#"[50,101,{"progress":true},[2]]"#);
    router.send(r#"[50,101,{}]"#);

    let mut payloads = Vec::new();
    while let Some(result) = rpc.next_result().await {
        payloads.push(result.unwrap());
    }
    pretty_assertions::assert_eq!(
        payloads,
        Vec::from_iter([
            RpcResult {
                arguments: List::from_iter([Value::Integer(1)]),
                ..Default::default()
            },
            RpcResult {
                arguments: List::from_iter([Value::Integer(2)]),
                ..Default::default()
            },
        ])
    );

    drop(rpc);
    router.expect_no_frame().await;
}

#[tokio::test]
async fn caller_receives_error_for_call() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    router.next_frame().await;

    router.send(r#"[8,48,101,{},"com.myapp.error.custom",["something broke"]]"#);

    assert_matches::assert_matches!(rpc.next_result().await, Some(Err(err)) => {
        assert_matches::assert_matches!(err.downcast_ref::<WampError>(), Some(err) => {
            assert_eq!(err.reason().as_ref(), "com.myapp.error.custom");
            assert_eq!(err.to_string(), "something broke");
        });
    });
    assert_matches::assert_matches!(rpc.next_result().await, None);

    // The error terminated the call, so releasing it sends no CANCEL.
    drop(rpc);
    router.expect_no_frame().await;
}

#[tokio::test]
async fn call_and_wait_returns_final_result() {
    let (peer, mut router) = established_peer(101).await;

    let (result, ()) = tokio::join!(
        peer.call_and_wait(Uri::try_from("thing").unwrap(), RpcCall::default()),
        async {
            router.next_frame().await;
            router.send(r#"[50,101,{"progress":true},[1]]"#);
            router.send(r#"[50,101,{},["Done!"]]"#);
        }
    );
    pretty_assertions::assert_eq!(
        result.unwrap(),
        RpcResult {
            arguments: List::from_iter([Value::String("Done!".to_owned())]),
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn calls_fail_on_transport_loss() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    router.next_frame().await;

    router.close();

    assert_matches::assert_matches!(rpc.next_result().await, Some(Err(err)) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Closed)
        );
    });
}

#[tokio::test]
async fn calls_fail_on_transport_failure() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    router.next_frame().await;

    router.fail("connection reset");

    assert_matches::assert_matches!(rpc.next_result().await, Some(Err(err)) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Failed(cause)) => {
                assert!(cause.contains("connection reset"));
            }
        );
    });
}

#[tokio::test]
async fn calls_fail_when_router_aborts_session() {
    let (peer, mut router) = established_peer(101).await;

    let mut rpc = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    router.next_frame().await;

    router.send(r#"[3,{"message":"shutting down"},"wamp.close.system_shutdown"]"#);

    assert_matches::assert_matches!(rpc.next_result().await, Some(Err(err)) => {
        assert_matches::assert_matches!(err.downcast_ref::<WampError>(), Some(err) => {
            assert_eq!(err.reason().as_ref(), "wamp.close.system_shutdown");
        });
    });
}

fn progressive_echo(invocation: Invocation) -> PayloadStream {
    assert_eq!(
        invocation.arguments,
        List::from_iter([Value::Integer(123), Value::String("abc".to_owned())])
    );
    assert_eq!(
        invocation.arguments_keyword,
        Dictionary::from_iter([("some".to_owned(), Value::String("data".to_owned()))])
    );
    futures_util::stream::iter([
        Ok::<_, anyhow::Error>(RpcYield {
            arguments: List::from_iter([Value::String("answer".to_owned()), Value::Integer(456)]),
            arguments_keyword: Dictionary::from_iter([("dictAnswer".to_owned(), Value::Integer(789))]),
        }),
        Ok(RpcYield {
            arguments: List::from_iter([Value::Integer(2)]),
            ..Default::default()
        }),
    ])
    .boxed()
}

async fn register_procedure(
    peer: &WebSocketPeer,
    router: &mut MockRouter,
    procedure: &str,
    handler: impl wamplink::peer::ProcedureHandler,
) -> wamplink::peer::Registration {
    let (result, frame) = tokio::join!(
        peer.register(Uri::try_from(procedure).unwrap(), handler),
        async {
            let frame = router.next_frame_text().await;
            router.send(r#"[65,101,123]"#);
            frame
        }
    );
    assert_eq!(
        frame,
        format!(r#"[64,101,{{"receive_progress":true}},"{procedure}"]"#)
    );
    let registration = result.unwrap();
    assert_eq!(registration.id, Id::try_from(123).unwrap());
    registration
}

#[tokio::test]
async fn callee_yields_progressive_results() {
    let (peer, mut router) = established_peer(101).await;
    let _registration = register_procedure(&peer, &mut router, "my.function1", progressive_echo).await;

    router.send(r#"[68,1000,123,{"receive_progress":true},[123,"abc"],{"some":"data"}]"#);

    assert_eq!(
        router.next_frame_text().await,
        r#"[70,1000,{"progress":true},["answer",456],{"dictAnswer":789}]"#
    );
    assert_eq!(
        router.next_frame_text().await,
        r#"[70,1000,{"progress":true},[2]]"#
    );
    assert_eq!(router.next_frame_text().await, r#"[70,1000,{}]"#);

    // Exactly one terminal frame per invocation.
    router.expect_no_frame().await;
}

#[tokio::test]
async fn callee_buffers_last_payload_without_progress() {
    fn handler(_: Invocation) -> PayloadStream {
        futures_util::stream::iter([
            Ok::<_, anyhow::Error>(RpcYield {
                arguments: List::from_iter([Value::Integer(1)]),
                ..Default::default()
            }),
            Ok(RpcYield {
                arguments: List::from_iter([Value::Integer(2)]),
                ..Default::default()
            }),
        ])
        .boxed()
    }

    let (peer, mut router) = established_peer(101).await;
    let _registration = register_procedure(&peer, &mut router, "my.function1", handler).await;

    router.send(r#"[68,1001,123,{}]"#);

    assert_eq!(router.next_frame_text().await, r#"[70,1001,{},[2]]"#);
    router.expect_no_frame().await;
}

#[tokio::test]
async fn callee_completes_empty_invocation_without_payload() {
    fn handler(_: Invocation) -> PayloadStream {
        futures_util::stream::empty().boxed()
    }

    let (peer, mut router) = established_peer(101).await;
    let _registration = register_procedure(&peer, &mut router, "my.function1", handler).await;

    router.send(r#"[68,1002,123,{}]"#);

    assert_eq!(router.next_frame_text().await, r#"[70,1002,{}]"#);
    router.expect_no_frame().await;
}

#[tokio::test]
async fn callee_reports_handler_error() {
    fn handler(_: Invocation) -> PayloadStream {
        futures_util::stream::iter([Err::<RpcYield, anyhow::Error>(
            WampError::new(Uri::try_from("com.myapp.error.failed").unwrap(), "it broke").into(),
        )])
        .boxed()
    }

    let (peer, mut router) = established_peer(101).await;
    let _registration = register_procedure(&peer, &mut router, "my.function1", handler).await;

    router.send(r#"[68,1000,123,{}]"#);

    assert_eq!(
        router.next_frame_text().await,
        r#"[8,68,1000,{},"com.myapp.error.failed",["it broke"]]"#
    );
    router.expect_no_frame().await;
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn interrupt_cancels_pending_invocation() {
    let cleaned_up = Arc::new(AtomicBool::new(false));
    let flag = cleaned_up.clone();
    let handler = move |_: Invocation| -> PayloadStream {
        let guard = DropFlag(flag.clone());
        futures_util::stream::iter([Ok::<_, anyhow::Error>(RpcYield {
            arguments: List::from_iter([Value::Integer(1)]),
            ..Default::default()
        })])
        .chain(futures_util::stream::unfold(guard, |guard| async move {
            let _guard = guard;
            futures_util::future::pending::<Option<(anyhow::Result<RpcYield>, DropFlag)>>().await
        }))
        .boxed()
    };

    let (peer, mut router) = established_peer(101).await;
    let _registration = register_procedure(&peer, &mut router, "my.function1", handler).await;

    router.send(r#"[68,1000,123,{"receive_progress":true},[1]]"#);

    // Wait for the first progressive payload, so the invocation is known to be in flight.
    assert_eq!(
        router.next_frame_text().await,
        r#"[70,1000,{"progress":true},[1]]"#
    );

    router.send(r#"[69,1000,{"mode":"kill"}]"#);

    assert_eq!(
        router.next_frame_text().await,
        r#"[8,68,1000,{},"wamp.error.cancelled",["function call has been cancelled"]]"#
    );
    assert!(cleaned_up.load(Ordering::SeqCst));
    router.expect_no_frame().await;
}

#[tokio::test]
async fn unregister_awaits_acknowledgment() {
    let (peer, mut router) = established_peer(101).await;
    let registration = register_procedure(&peer, &mut router, "my.function1", progressive_echo).await;

    let (result, frame) = tokio::join!(peer.unregister(registration), async {
        let frame = router.next_frame_text().await;
        router.send(r#"[67,102]"#);
        frame
    });
    assert_matches::assert_matches!(result, Ok(()));
    assert_eq!(frame, r#"[66,102,123]"#);
}

#[tokio::test]
async fn unregister_swallows_router_errors() {
    let (peer, mut router) = established_peer(101).await;
    let registration = register_procedure(&peer, &mut router, "my.function1", progressive_echo).await;

    let (result, ()) = tokio::join!(peer.unregister(registration), async {
        router.next_frame().await;
        router.send(r#"[8,66,102,{},"wamp.error.no_such_registration"]"#);
    });
    assert_matches::assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn releasing_registration_sends_unregister() {
    let (peer, mut router) = established_peer(101).await;
    let registration = register_procedure(&peer, &mut router, "my.function1", progressive_echo).await;

    drop(registration);
    assert_eq!(router.next_frame_text().await, r#"[66,102,123]"#);
}

#[tokio::test]
async fn request_ids_are_unique_across_operations() {
    let (peer, mut router) = established_peer(500).await;

    let _first = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    let _second = peer
        .call(Uri::try_from("thing").unwrap(), RpcCall::default())
        .await
        .unwrap();
    let first = router.next_frame().await;
    let second = router.next_frame().await;
    assert_eq!(first[1], serde_json::json!(500));
    assert_eq!(second[1], serde_json::json!(501));
}
