use jsonrpcquickly::{
    net::{client::TcpTransport, server::Server},
    BoxFuture, ProcedureError, ProcedureRegistry, RpcFunction,
};
use std::sync::Arc;
use tokio::{net::TcpListener, task};

pub struct Hello;

impl RpcFunction for Hello {
    type Domain = (String,);
    type Range = String;
    type RangeFut = BoxFuture<'static, Result<String, ProcedureError>>;

    fn name(&self) -> &str {
        "Hello"
    }

    fn call(self: Arc<Self>, (name,): (String,)) -> Self::RangeFut {
        Box::pin(async move { Ok(format!("Hello, {name}!")) })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut registry = ProcedureRegistry::new();
    registry.add(Hello);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(Server::from(registry).serve(listener));

    let client = TcpTransport::connect(addr).await.unwrap();
    let retval: String = client.call("Hello", "world").await.unwrap();
    println!("{retval}");
}
