use jsonrpcquickly::{
    net::{client::TcpTransport, server::Server},
    CallError, CancellationToken, ClientConfig, ProcedureError, ProcedureRegistry,
};
use std::time::{Duration, Instant};
use tokio::{net::TcpListener, task};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut registry = ProcedureRegistry::new();
    registry
        .add_fn("Ping", |(): ()| async move { Ok::<_, ProcedureError>(()) })
        .add_fn("Sleep", |(millis,): (u64,)| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, ProcedureError>(millis)
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(Server::from(registry).serve(listener));

    let config = ClientConfig::default().default_timeout(Duration::from_millis(500));
    let client = TcpTransport::connect_with(addr, config).await.unwrap();

    for _ in 0..3 {
        let started = Instant::now();
        client.call::<_, ()>("Ping", ()).await.unwrap();
        println!("ping: {:?}", started.elapsed());
    }

    match client.call::<_, u64>("Sleep", 2000).await {
        Err(CallError::Timeout { elapsed, .. }) => println!("gave up after {elapsed:?}"),
        other => println!("unexpected: {other:?}"),
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    task::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let slept = client
        .call_with::<_, u64>("Sleep", 1000, Duration::from_secs(5), &cancel)
        .await;
    println!("cancelled sleep: {slept:?}");
}
