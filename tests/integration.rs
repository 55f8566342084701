use std::sync::Arc;
use std::time::Duration;

use filebridge::config::{BridgeConfig, HttpConfig, TcpConfig};
use filebridge::state::BridgeState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Spins up the full stack (HTTP front + stream acceptor + sweeper) on
/// ephemeral ports and hands back both bound addresses plus the shared
/// state, so a test can drive a provider connection and a consumer
/// download against a live instance without touching disk or a real port.
async fn spawn_bridge() -> (String, std::net::SocketAddr, Arc<BridgeState>) {
    let config = BridgeConfig {
        http: HttpConfig { socket: "127.0.0.1:0".into(), public_base_url: None },
        tcp: TcpConfig { socket: "127.0.0.1:0".into(), public_host: "127.0.0.1".into() },
        max_file_size_gib: 1,
        token_length: 16,
    };
    let state = BridgeState::new(Arc::new(config));

    // reserve an ephemeral port so the address is known before the acceptor
    // binds it itself; the brief window between drop and rebind is not a
    // realistic flake source on a loopback interface in a test process.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_addr = probe.local_addr().unwrap();
    drop(probe);
    {
        let state = state.clone();
        let cancel = state.cancel.clone();
        tokio::spawn(async move {
            filebridge::stream::acceptor::run(state, tcp_addr, cancel).await.unwrap();
        });
    }

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    let router = filebridge::http::router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            http_listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{http_addr}"), tcp_addr, state)
}

async fn connect_provider(tcp_addr: std::net::SocketAddr, token: &str, payload: &[u8]) {
    let mut stream = TcpStream::connect(tcp_addr).await.unwrap();
    let handshake = format!("{{\"auth_token\":\"{token}\"}}\n");
    stream.write_all(handshake.as_bytes()).await.unwrap();

    let mut reply = [0u8; 13];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"STREAM_READY\n");

    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_register_stream_download_roundtrip() {
    let (http_base, tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let register: serde_json::Value = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "report.pdf", "size": 5}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = register["auth_token"].as_str().unwrap().to_owned();

    let payload = b"hello".to_vec();
    tokio::spawn(connect_provider(tcp_addr, &token, &payload));

    // give the provider a moment to reach STREAM_READY before the consumer
    // starts polling, matching the "provider later" ordering of spec §4.3.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = client
        .get(format!("{http_base}/download/{token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"report.pdf\""
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test(flavor = "multi_thread")]
async fn consumer_can_arrive_before_provider() {
    let (http_base, tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let register: serde_json::Value = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "late.bin", "size": 3}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = register["auth_token"].as_str().unwrap().to_owned();

    let download = {
        let client = client.clone();
        let http_base = http_base.clone();
        let token = token.clone();
        tokio::spawn(async move {
            client
                .get(format!("{http_base}/download/{token}"))
                .send()
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    connect_provider(tcp_addr, &token, b"abc").await;

    let response = download.await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"abc");
}

#[tokio::test(flavor = "multi_thread")]
async fn register_rejects_empty_filename() {
    let (http_base, _tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "", "size": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn register_rejects_oversize_declaration() {
    let (http_base, _tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let oversize = 2 * 1024 * 1024 * 1024_u64; // 2 GiB against a 1 GiB limit
    let response = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "huge.bin", "size": oversize}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread")]
async fn download_of_unknown_token_is_404() {
    let (http_base, _tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{http_base}/download/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_handshake_with_unknown_token_is_rejected() {
    let (_http_base, tcp_addr, _state) = spawn_bridge().await;

    let mut stream = TcpStream::connect(tcp_addr).await.unwrap();
    stream
        .write_all(b"{\"auth_token\":\"nonexistent\"}\n")
        .await
        .unwrap();

    let mut reply = [0u8; 19];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"INVALID_CONNECTION\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn second_download_attempt_after_claim_is_rejected() {
    let (http_base, tcp_addr, state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let register: serde_json::Value = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "once.bin", "size": 3}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = register["auth_token"].as_str().unwrap().to_owned();

    tokio::spawn(connect_provider(tcp_addr, &token, b"xyz"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // I3: only one consumer ever wins the rendezvous for a given stream.
    let first = state.registry.try_claim_stream(&token, "127.0.0.1:9").await;
    assert!(matches!(first, filebridge::registry::ClaimOutcome::Claimed(_, _)));
    let second = state.registry.try_claim_stream(&token, "127.0.0.1:9").await;
    assert!(matches!(second, filebridge::registry::ClaimOutcome::NotReady));
}

/// Scenario 8 end to end: a successful download exhausts the token, a
/// second `GET /download/{token}` sees it as terminal, and a provider that
/// reconnects with the same token afterwards is rejected outright rather
/// than handed a fresh rendezvous window.
#[tokio::test(flavor = "multi_thread")]
async fn single_use_enforcement_end_to_end() {
    let (http_base, tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let register: serde_json::Value = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "once.bin", "size": 3}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = register["auth_token"].as_str().unwrap().to_owned();

    tokio::spawn(connect_provider(tcp_addr, &token, b"xyz"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let first = client
        .get(format!("{http_base}/download/{token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);
    assert_eq!(first.bytes().await.unwrap().as_ref(), b"xyz");

    let second = client
        .get(format!("{http_base}/download/{token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::NOT_FOUND);

    let mut stream = TcpStream::connect(tcp_addr).await.unwrap();
    stream
        .write_all(format!("{{\"auth_token\":\"{token}\"}}\n").as_bytes())
        .await
        .unwrap();
    let mut reply = [0u8; 19];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"INVALID_CONNECTION\n");
}

/// Scenario 7: 50 concurrent registrations all succeed, yield pairwise
/// distinct tokens, and each is independently visible via `GET /status`.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_registrations_yield_distinct_tokens() {
    let (http_base, _tcp_addr, _state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let mut handles = Vec::new();
    for i in 0..50 {
        let client = client.clone();
        let http_base = http_base.clone();
        handles.push(tokio::spawn(async move {
            let response = client
                .post(format!("{http_base}/register"))
                .json(&serde_json::json!({"filename": format!("concurrent-{i}.bin"), "size": 1}))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let body: serde_json::Value = response.json().await.unwrap();
            body["auth_token"].as_str().unwrap().to_owned()
        }));
    }

    let mut tokens = Vec::with_capacity(handles.len());
    for handle in handles {
        tokens.push(handle.await.unwrap());
    }

    let distinct: std::collections::HashSet<&str> = tokens.iter().map(String::as_str).collect();
    assert_eq!(distinct.len(), tokens.len(), "all 50 tokens must be pairwise distinct");

    for token in &tokens {
        let status = client
            .get(format!("{http_base}/status/{token}"))
            .send()
            .await
            .unwrap();
        assert_eq!(status.status(), reqwest::StatusCode::OK);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reflects_lifecycle_and_expiry_sweep_evicts() {
    let (http_base, _tcp_addr, state) = spawn_bridge().await;
    let client = reqwest::Client::new();

    let register: serde_json::Value = client
        .post(format!("{http_base}/register"))
        .json(&serde_json::json!({"filename": "soon.bin", "size": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = register["auth_token"].as_str().unwrap().to_owned();

    let status = client
        .get(format!("{http_base}/status/{token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), reqwest::StatusCode::OK);

    let expired = state
        .registry
        .sweep_expired(chrono::Utc::now() + chrono::Duration::hours(3))
        .await;
    assert_eq!(expired, vec![token.clone()]);
    for t in &expired {
        state.registry.evict(t).await;
    }

    let status = client
        .get(format!("{http_base}/status/{token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), reqwest::StatusCode::NOT_FOUND);
}
