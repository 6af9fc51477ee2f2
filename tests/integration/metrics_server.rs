//! HTTP exposition of prober metrics

use std::sync::Arc;
use std::time::Duration;

use kvprober::metrics::{start_metrics_server, ProberMetrics};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn http_get(addr: &str, path: &str) -> String {
    let mut stream = None;
    for _ in 0..50 {
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut stream = stream.expect("metrics server did not start");

    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prober_counters() {
    let metrics = Arc::new(ProberMetrics::new().unwrap());
    metrics.read_probe_attempts.inc();
    metrics.write_probe_failures.inc();

    let addr = free_addr().await;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let addr = addr.clone();
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        async move { start_metrics_server(&addr, metrics, shutdown).await }
    });

    let response = http_get(&addr, "/metrics").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("kv_prober_read_attempts_total 1"));
    assert!(response.contains("kv_prober_write_failures_total 1"));
    assert!(response.contains("kv_prober_planning_attempts_total 0"));

    let response = http_get(&addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"));

    let response = http_get(&addr, "/nope").await;
    assert!(response.starts_with("HTTP/1.1 404"));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
