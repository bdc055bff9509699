//! WebSocket stream server tests against a real socket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use statusboard_core::config::ServerConfig;
use statusboard_core::{
    ClientRegistry, CombinedStatus, EmojiRenderer, StatusCell, StatusPush, StreamServer,
};

async fn start_server(
    registry: &ClientRegistry,
    status: StatusCell,
    max_clients: usize,
) -> (SocketAddr, watch::Sender<bool>) {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        max_clients,
        ..Default::default()
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = StreamServer::new(
        &config,
        registry.clone(),
        status,
        Arc::new(EmojiRenderer),
        shutdown_rx,
    );
    let (listener, addr) = server.bind().await.unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    (addr, shutdown_tx)
}

async fn wait_for_count(registry: &ClientRegistry, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_push<S>(ws: &mut S) -> StatusPush
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn busy() -> CombinedStatus {
    CombinedStatus {
        emoji: ":red_circle:".into(),
        text: "Busy".into(),
        times: "Started @ 9:00 AM".into(),
        status_start_time: "9:00 AM".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_client_gets_current_status_then_dispatches() {
    let registry = ClientRegistry::new();
    let status = StatusCell::new(busy());
    let (addr, _shutdown) = start_server(&registry, status, 8).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/kiosk"))
        .await
        .unwrap();

    let greeting = next_push(&mut ws).await;
    assert_eq!(greeting.text, "Busy");

    wait_for_count(&registry, 1).await;
    let id = registry.client_ids()[0];
    assert_eq!(registry.page_name(&id).as_deref(), Some("kiosk"));

    let away = CombinedStatus {
        text: "Away".into(),
        ..busy()
    };
    let result = registry.dispatch(&away, &EmojiRenderer, "9:41:07 AM");
    assert_eq!(result.delivered, 1);

    let push = next_push(&mut ws).await;
    assert_eq!(push.text, "Away");
    assert_eq!(push.last_updated_time, "9:41:07 AM");

    ws.close(None).await.unwrap();
    wait_for_count(&registry, 0).await;
}

#[tokio::test]
async fn test_root_path_is_index_page() {
    let registry = ClientRegistry::new();
    let (addr, _shutdown) = start_server(&registry, StatusCell::default(), 8).await;

    let (_ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    wait_for_count(&registry, 1).await;

    let id = registry.client_ids()[0];
    assert_eq!(registry.page_name(&id).as_deref(), Some("index"));
}

#[tokio::test]
async fn test_ping_answered() {
    let registry = ClientRegistry::new();
    let (addr, _shutdown) = start_server(&registry, StatusCell::default(), 8).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    let _greeting = next_push(&mut ws).await;

    ws.send(Message::Ping(b"hi".to_vec())).await.unwrap();
    let pong = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(pong, Message::Pong(b"hi".to_vec()));
}

#[tokio::test]
async fn test_client_limit_enforced() {
    let registry = ClientRegistry::new();
    let (addr, _shutdown) = start_server(&registry, StatusCell::default(), 1).await;

    let (_first, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    wait_for_count(&registry, 1).await;

    let second = tokio_tungstenite::connect_async(format!("ws://{addr}/")).await;
    assert!(second.is_err());
    assert_eq!(registry.count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let registry = ClientRegistry::new();
    let (addr, shutdown) = start_server(&registry, StatusCell::default(), 8).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    let _greeting = next_push(&mut ws).await;
    wait_for_count(&registry, 1).await;

    shutdown.send(true).unwrap();
    wait_for_count(&registry, 0).await;
}
