use futures::future::{ready, BoxFuture};
use jsonrpcquickly::{
    CallError, CancellationToken, Client, ClientConfig, Request, Response, Transport,
};
use rand::seq::SliceRandom;
use serde_json::json;
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

/// Records every payload instead of sending it anywhere.
struct Recorder {
    sent_tx: mpsc::UnboundedSender<String>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { sent_tx }), sent_rx)
    }
}

impl Transport for Recorder {
    fn send<'a>(
        &'a self,
        payload: String,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, io::Result<()>> {
        let sent = self
            .sent_tx
            .send(payload)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "recorder dropped"));
        Box::pin(ready(sent))
    }
}

struct Unplugged;

impl Transport for Unplugged {
    fn send<'a>(
        &'a self,
        _payload: String,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(ready(Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "unplugged",
        ))))
    }
}

/// Takes its time handing anything off, like a socket under backpressure.
struct Sluggish {
    delay: Duration,
}

impl Transport for Sluggish {
    fn send<'a>(
        &'a self,
        _payload: String,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

async fn next_request(sent_rx: &mut mpsc::UnboundedReceiver<String>) -> Request {
    let payload = sent_rx.recv().await.unwrap();
    serde_json::from_str(&payload).unwrap()
}

#[tokio::test]
async fn reply_delivered_later_completes_the_call() {
    let (transport, mut sent_rx) = Recorder::new();
    let client = Arc::new(Client::new(transport));

    let router = client.router();
    let server = tokio::spawn(async move {
        let request = next_request(&mut sent_rx).await;
        assert_eq!(request.method, "Greet");
        assert_eq!(request.params, Some(json!(["Ann"])));
        tokio::time::sleep(Duration::from_millis(10)).await;
        router.on_data_received(r#"{"result":"Hello, Ann!","id":0}"#);
    });

    let greeting: String = client
        .call_with("Greet", ["Ann"], Duration::from_millis(1000), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(greeting, "Hello, Ann!");
    assert_eq!(client.pending_calls(), 0);
    server.await.unwrap();
}

#[tokio::test]
async fn permuted_responses_reach_their_own_calls() {
    const CALLS: u64 = 32;
    let (transport, mut sent_rx) = Recorder::new();
    let client = Arc::new(Client::new(transport));

    let mut calls = Vec::new();
    for n in 0..CALLS {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let doubled: Result<u64, CallError> = client.call("Double", (n,)).await;
            (n, doubled)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..CALLS {
        requests.push(next_request(&mut sent_rx).await);
    }
    let mut ids: Vec<_> = requests.iter().map(|request| request.id.clone().unwrap()).collect();
    ids.sort_by_key(|id| id.to_string());
    ids.dedup();
    assert_eq!(ids.len() as u64, CALLS);

    requests.shuffle(&mut rand::thread_rng());
    for request in requests {
        let n = request.params.unwrap()[0].as_u64().unwrap();
        let response = if n % 5 == 0 {
            Response::error(
                request.id,
                jsonrpcquickly::ProtocolError::new(-32000, "multiple of five").with_data(n),
            )
        } else {
            Response::success(request.id, json!(n * 2))
        };
        client.on_data_received(&serde_json::to_string(&response).unwrap());
    }

    for call in calls {
        let (n, doubled) = call.await.unwrap();
        match doubled {
            Ok(doubled) => assert_eq!(doubled, n * 2),
            Err(CallError::Protocol(error)) => {
                assert_eq!(n % 5, 0);
                assert_eq!(error.data, Some(json!(n)));
            }
            Err(other) => panic!("call {n} failed: {other}"),
        }
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn unanswered_call_times_out() {
    let (transport, _sent_rx) = Recorder::new();
    let client = Client::new(transport);
    let timeout = Duration::from_millis(50);

    let started = Instant::now();
    let err = client
        .call_with::<_, String>("Greet", ["Ann"], timeout, &CancellationToken::new())
        .await
        .unwrap_err();
    let waited = started.elapsed();

    match err {
        CallError::Timeout { method, elapsed } => {
            assert_eq!(method, "Greet");
            assert!(elapsed >= timeout);
        }
        other => panic!("expected a timeout, got {other}"),
    }
    assert!(waited >= timeout);
    assert!(waited < timeout + Duration::from_millis(250), "waited {waited:?}");
    assert_eq!(client.pending_calls(), 0);

    // A reply arriving after the timeout is ignored.
    client.on_data_received(r#"{"result":"late","id":0}"#);
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn timeout_bounds_a_slow_send() {
    let client = Client::new(Arc::new(Sluggish {
        delay: Duration::from_millis(600),
    }));
    let timeout = Duration::from_millis(100);

    let started = Instant::now();
    let err = client
        .call_with::<_, String>("Greet", ["Ann"], timeout, &CancellationToken::new())
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, CallError::Timeout { .. }), "{err}");
    assert!(waited >= timeout);
    assert!(waited < timeout + Duration::from_millis(250), "waited {waited:?}");
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn cancellation_interrupts_a_slow_send() {
    let client = Client::new(Arc::new(Sluggish {
        delay: Duration::from_secs(10),
    }));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = client
        .call_with::<_, String>("Greet", ["Ann"], Duration::from_secs(20), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Cancelled { .. }), "{err}");
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn default_timeout_comes_from_config() {
    let (transport, _sent_rx) = Recorder::new();
    let client = Client::new(transport)
        .with_config(ClientConfig::default().default_timeout(Duration::from_millis(20)));
    let err = client.call::<_, ()>("Ping", ()).await.unwrap_err();
    assert!(matches!(err, CallError::Timeout { .. }), "{err}");
}

#[tokio::test]
async fn cancellation_ends_the_wait_early() {
    let (transport, _sent_rx) = Recorder::new();
    let client = Client::new(transport);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = client
        .call_with::<_, String>("Greet", ["Ann"], Duration::from_secs(10), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Cancelled { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn dropping_the_call_releases_its_entry() {
    let (transport, _sent_rx) = Recorder::new();
    let client = Client::new(transport);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        client.call::<_, String>("Greet", ["Ann"]),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn malformed_response_is_a_distinct_failure() {
    let (transport, mut sent_rx) = Recorder::new();
    let client = Arc::new(Client::new(transport));

    let router = client.router();
    tokio::spawn(async move {
        let request = next_request(&mut sent_rx).await;
        let id = serde_json::to_string(&request.id).unwrap();
        router.on_data_received(&format!(r#"{{"jsonrpc":"2.0","error":null,"id":{id}}}"#));
    });

    let err = client.call::<_, String>("Greet", ["Ann"]).await.unwrap_err();
    assert!(matches!(err, CallError::MalformedResponse { .. }), "{err}");
}

#[tokio::test]
async fn result_of_the_wrong_type_is_a_decode_failure() {
    let (transport, mut sent_rx) = Recorder::new();
    let client = Arc::new(Client::new(transport));

    let router = client.router();
    tokio::spawn(async move {
        let request = next_request(&mut sent_rx).await;
        let response = Response::success(request.id, json!({"not": "a number"}));
        router.on_data_received(&serde_json::to_string(&response).unwrap());
    });

    let err = client.call::<_, i64>("Count", ()).await.unwrap_err();
    assert!(matches!(err, CallError::Decode { .. }), "{err}");
}

#[tokio::test]
async fn null_result_decodes_as_unit() {
    let (transport, mut sent_rx) = Recorder::new();
    let client = Arc::new(Client::new(transport));

    let router = client.router();
    tokio::spawn(async move {
        let request = next_request(&mut sent_rx).await;
        assert!(request.params.is_none());
        let response = Response::success(request.id, json!(null));
        router.on_data_received(&serde_json::to_string(&response).unwrap());
    });

    client.call::<_, ()>("Ping", ()).await.unwrap();
}

#[tokio::test]
async fn transport_failure_is_surfaced() {
    let client = Client::new(Arc::new(Unplugged));
    let err = client.call::<_, String>("Greet", ["Ann"]).await.unwrap_err();
    match err {
        CallError::Transport(err) => assert_eq!(err.kind(), io::ErrorKind::NotConnected),
        other => panic!("expected a transport error, got {other}"),
    }
    assert_eq!(client.pending_calls(), 0);

    let err = client.notify("Log", ["x"]).await.unwrap_err();
    assert!(matches!(err, CallError::Transport(_)));
}

#[tokio::test]
async fn notification_skips_correlation() {
    let (transport, mut sent_rx) = Recorder::new();
    let client = Client::new(transport);

    client.notify("Log", ["x"]).await.unwrap();
    assert_eq!(client.pending_calls(), 0);

    let request = next_request(&mut sent_rx).await;
    assert!(request.is_notification());
    assert_eq!(request.jsonrpc.as_deref(), Some("2.0"));
    assert_eq!(request.params, Some(json!(["x"])));
}

#[tokio::test]
async fn closing_fails_waiting_and_new_calls() {
    let (transport, mut sent_rx) = Recorder::new();
    let client = Arc::new(Client::new(transport));

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.call::<_, String>("Greet", ["Ann"]).await })
    };
    next_request(&mut sent_rx).await;
    client.close();

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, CallError::Closed { .. }), "{err}");
    let err = client.call::<_, String>("Greet", ["Bob"]).await.unwrap_err();
    assert!(matches!(err, CallError::Closed { .. }), "{err}");
}

#[tokio::test]
async fn error_without_id_goes_out_of_band() {
    let (transport, _sent_rx) = Recorder::new();
    let (client, mut errors) = Client::with_unsolicited_errors(transport);

    client.on_data_received(
        r#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"Invalid JSON"},"id":null}"#,
    );
    let error = errors.recv().await.unwrap();
    assert_eq!(error.code, -32700);

    // Without a listener the error is only logged.
    let (transport, _sent_rx) = Recorder::new();
    let client = Client::new(transport);
    client.on_data_received(r#"{"error":{"code":-32603,"message":"Internal Error"}}"#);
    assert_eq!(client.pending_calls(), 0);
}
