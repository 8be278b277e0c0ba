//! `WebSocket` tests against a live server.
//!
//! The server is started with [`spawn_server`] on a free local port and
//! driven by a minimal client speaking the RFC 6455 handshake and
//! unmasked server frames over a plain `TcpStream`.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use relief_api::{spawn_server, AppState, ServerConfig};
use relief_core::config::ReliefConfig;
use relief_core::ManualClock;
use relief_db::RecordStore;
use relief_types::{Identity, NewDisaster, Role};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

/// Send an upgrade request and return the response head.
async fn request_upgrade(stream: &mut TcpStream, path: &str, port: u16) -> String {
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: 127.0.0.1:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await.unwrap());
    }
    String::from_utf8(head).unwrap()
}

fn local(port: u16) -> ServerConfig {
    ServerConfig {
        host: String::from("127.0.0.1"),
        port,
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_text(stream: &mut TcpStream) -> Value {
    loop {
        let first = stream.read_u8().await.unwrap();
        let second = stream.read_u8().await.unwrap();
        let len = match second & 0x7f {
            126 => u64::from(stream.read_u16().await.unwrap()),
            127 => stream.read_u64().await.unwrap(),
            short => u64::from(short),
        };
        let mut payload = vec![0_u8; usize::try_from(len).unwrap()];
        stream.read_exact(&mut payload).await.unwrap();
        if (first & 0x0f) == 0x1 {
            return serde_json::from_slice(&payload).unwrap();
        }
    }
}

fn disaster(title: &str) -> NewDisaster {
    NewDisaster {
        title: title.to_owned(),
        location_name: String::from("NYC"),
        description: String::new(),
        tags: BTreeSet::from([String::from("urgent")]),
        owner_id: None,
    }
}

fn admin() -> Identity {
    Identity {
        id: String::from("reliefAdmin"),
        role: Role::Admin,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_during_snapshot_arrives_after_snapshot_frame() {
    let clock = Arc::new(ManualClock::default());
    let state = Arc::new(AppState::in_memory(&ReliefConfig::default(), clock));
    let coordinator = &state.coordinator;
    coordinator.create_disaster(&admin(), disaster("Flood")).await.unwrap();

    match coordinator.store() {
        RecordStore::Memory(store) => store.set_list_delay(Duration::from_millis(300)),
        RecordStore::Postgres(_) => return,
    }

    let port = free_port();
    let server = spawn_server(local(port), Arc::clone(&state)).unwrap();
    let mut stream = connect(port).await;
    let head = request_upgrade(&mut stream, "/ws", port).await;
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");

    // The handler has subscribed and is now waiting on the snapshot read.
    tokio::time::timeout(Duration::from_secs(2), async {
        while coordinator.bus().observer_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let wildfire = coordinator.create_disaster(&admin(), disaster("Wildfire")).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), next_text(&mut stream))
        .await
        .unwrap();
    assert_eq!(first["type"], "snapshot");
    let titles: Vec<&str> = first["disasters"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["title"].as_str())
        .collect();
    assert!(titles.contains(&"Flood"), "{titles:?}");

    let second = tokio::time::timeout(Duration::from_secs(2), next_text(&mut stream))
        .await
        .unwrap();
    assert_eq!(second["type"], "event");
    assert_eq!(second["event"]["channel"], "disaster_updated");
    assert_eq!(second["event"]["payload"]["disaster"]["id"], wildfire.id.to_string());
    assert_eq!(
        second["event"]["sequence"].as_u64(),
        Some(coordinator.bus().last_sequence())
    );

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scoped_socket_with_bad_id_is_refused() {
    let state = Arc::new(AppState::in_memory(
        &ReliefConfig::default(),
        Arc::new(ManualClock::default()),
    ));
    let port = free_port();
    let server = spawn_server(local(port), Arc::clone(&state)).unwrap();
    let mut stream = connect(port).await;
    let head = request_upgrade(&mut stream, "/ws?disaster_id=nope", port).await;
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");
    assert_eq!(state.coordinator.bus().observer_count(), 0);

    server.abort();
}
