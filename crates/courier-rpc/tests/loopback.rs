use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use courier_rpc::{ClientPool, PoolConfig, RpcClient, RpcError, Service};

struct EchoService;

#[async_trait]
impl Service for EchoService {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "echo" => Ok(params),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(params)
            }
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(courier_rpc::serve(listener, Arc::new(EchoService)));
    addr
}

#[tokio::test]
async fn test_call_round_trip() {
    let addr = spawn_server().await;
    let client = RpcClient::connect(&addr, Duration::from_secs(2))
        .await
        .unwrap();

    let reply: Value = client
        .call("echo", &json!({"user_id": "alice", "server_ip": "127.0.0.1:4100"}))
        .await
        .unwrap();
    assert_eq!(reply["user_id"], "alice");
    assert_eq!(reply["server_ip"], "127.0.0.1:4100");
}

#[tokio::test]
async fn test_unknown_method_is_a_remote_error() {
    let addr = spawn_server().await;
    let client = RpcClient::connect(&addr, Duration::from_secs(2))
        .await
        .unwrap();

    let result: Result<Value, _> = client.call("nope", &json!({})).await;
    match result {
        Err(RpcError::Remote(message)) => assert!(message.contains("unknown method")),
        other => panic!("expected remote error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_call_timeout() {
    let addr = spawn_server().await;
    let client = RpcClient::connect(&addr, Duration::from_millis(50))
        .await
        .unwrap();

    let result: Result<Value, _> = client.call("slow", &json!({})).await;
    assert!(matches!(result, Err(RpcError::Timeout(_))));
}

#[tokio::test]
async fn test_pool_dials_once_per_address() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        let service = Arc::new(EchoService);
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let service = service.clone();
            tokio::spawn(courier_rpc::server::handle_connection(stream, service));
        }
    });

    let pool = ClientPool::new(PoolConfig {
        call_timeout: Duration::from_secs(2),
        ..PoolConfig::default()
    });

    let mut tasks = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        let addr = addr.clone();
        tasks.push(tokio::spawn(async move {
            let client = pool.get(&addr).await.unwrap();
            let reply: Value = client.call("echo", &json!({ "i": i })).await.unwrap();
            assert_eq!(reply["i"], i);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pool_redials_after_peer_hangup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let service = Arc::new(EchoService);
        // Accept, serve one request, then drop the connection.
        let (stream, _) = listener.accept().await.unwrap();
        let service_once = service.clone();
        tokio::spawn(async move {
            let _ = tokio::time::timeout(
                Duration::from_millis(100),
                courier_rpc::server::handle_connection(stream, service_once),
            )
            .await;
        });
        // Second connection is served normally.
        let (stream, _) = listener.accept().await.unwrap();
        courier_rpc::server::handle_connection(stream, service)
            .await
            .ok();
    });

    let pool = ClientPool::new(PoolConfig {
        call_timeout: Duration::from_secs(2),
        ..PoolConfig::default()
    });

    let client = pool.get(&addr).await.unwrap();
    let _: Value = client.call("echo", &json!({"n": 1})).await.unwrap();

    // Wait for the server to drop the first connection.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client.is_closed());

    let client = pool.get(&addr).await.unwrap();
    let reply: Value = client.call("echo", &json!({"n": 2})).await.unwrap();
    assert_eq!(reply["n"], 2);
}
