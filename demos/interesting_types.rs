use jsonrpcquickly::{
    call, name,
    net::{client::TcpTransport, server::Server},
    signature, typed, ProcedureError, ProcedureRegistry, RpcFunction, Type,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::{net::TcpListener, task};

pub struct MultipleChoice(&'static str);

impl MultipleChoice {
    fn new() -> Self {
        let ans = ["a", "b", "c", "d"][rand::random::<usize>() % 4];
        println!("The correct answer will be {ans}");
        Self(ans)
    }
}

impl RpcFunction for MultipleChoice {
    name!("MultipleChoice");
    signature!("guess": Type::String => Type::String);
    call! {
        async fn call(&self, (guess,): (String,)) -> String {
            if guess == self.0 {
                "right".into()
            } else {
                "wrong".into()
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

typed!(Point => Type::Object);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut registry = ProcedureRegistry::new();
    registry
        .add(MultipleChoice::new())
        .add_fn("Centroid", |(points,): (Vec<Point>,)| async move {
            if points.is_empty() {
                return Err(ProcedureError::application("no points"));
            }
            let n = points.len() as f64;
            let x = points.iter().map(|p| p.x).sum::<f64>() / n;
            let y = points.iter().map(|p| p.y).sum::<f64>() / n;
            Ok(Point { x, y })
        })
        .add_fn("Histogram", |(words,): (Vec<String>,)| async move {
            let mut counts = HashMap::<String, i64>::new();
            for word in words {
                *counts.entry(word).or_default() += 1;
            }
            Ok::<_, ProcedureError>(counts)
        })
        .add_fn("Maybe", |(n,): (Option<i64>,)| async move {
            Ok::<_, ProcedureError>(n.map(|n| n * 2))
        });

    for info in registry.procedures() {
        let params: Vec<_> = info
            .signature
            .params
            .iter()
            .map(|param| format!("{}: {}", param.name, param.typ))
            .collect();
        println!("{}({}) -> {}", info.name, params.join(", "), info.signature.returns);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(Server::from(registry).serve(listener));
    let client = TcpTransport::connect(addr).await.unwrap();

    for ans in ["a", "b", "c", "d"] {
        let retval: String = client.call("MultipleChoice", ans).await.unwrap();
        println!("{ans} is {retval}");
    }
    for bad_guess in [Value::from(10), Value::Null] {
        let err = client
            .call::<_, Value>("MultipleChoice", bad_guess)
            .await
            .unwrap_err();
        println!("{err}");
    }

    let points = vec![Point { x: 0.0, y: 0.0 }, Point { x: 2.0, y: 4.0 }];
    let centroid: Point = client.call("Centroid", (points,)).await.unwrap();
    println!("centroid = {centroid:?}");
    let err = client
        .call::<_, Point>("Centroid", (Vec::<Point>::new(),))
        .await
        .unwrap_err();
    println!("{err}");

    let counts: HashMap<String, i64> = client
        .call("Histogram", (["to", "be", "or", "not", "to", "be"],))
        .await
        .unwrap();
    println!("histogram = {counts:?}");

    let doubled: Option<i64> = client.call("Maybe", (Some(21),)).await.unwrap();
    let nothing: Option<i64> = client.call("Maybe", (None::<i64>,)).await.unwrap();
    println!("maybe = {doubled:?}, {nothing:?}");
}
