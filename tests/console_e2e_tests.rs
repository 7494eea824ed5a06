// ABOUTME: End-to-end test: console input through the coordinator to a mock Kobold server
// ABOUTME: Verifies the sanitized reply is printed back to the console

use natter::backends::KoboldBackend;
use natter::ConsoleSurface;
use natter_core::config::{BackendConfig, ConsoleConfig};
use natter_core::coordinator::{CoordinatorConfig, TurnCoordinator};
use natter_core::memory::MemoryStore;
use natter_core::persistence::InMemoryPersistence;
use natter_core::traits::{ChatSurface, GenerationBackend};
use natter_core::Persona;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::test]
async fn test_console_line_gets_sanitized_reply() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/generate")
        .with_status(200)
        .with_body(json!({"results": [{"text": "Aiko: Hi there!\nyou:"}]}).to_string())
        .create_async()
        .await;

    let (writer, output) = tokio::io::duplex(4096);
    let input = std::io::Cursor::new(b"hello Aiko\n".to_vec());
    let surface: Arc<dyn ChatSurface> = Arc::new(ConsoleSurface::with_io(
        &ConsoleConfig::default(),
        "Aiko",
        input,
        writer,
    ));

    let backend: Arc<dyn GenerationBackend> = Arc::new(
        KoboldBackend::from_config(&BackendConfig {
            backend_type: "kobold".to_string(),
            base_url: Some(server.url()),
            ..BackendConfig::default()
        })
        .unwrap(),
    );

    let coordinator = TurnCoordinator::new(
        surface,
        backend,
        Persona::new("Aiko"),
        MemoryStore::empty("Aiko", Arc::new(InMemoryPersistence::new())),
        CoordinatorConfig {
            debounce: Duration::from_millis(20),
            pacing_min: Duration::ZERO,
            pacing_max: Duration::ZERO,
            ..CoordinatorConfig::default()
        },
    );

    coordinator.run().await.unwrap();

    let mut lines = BufReader::new(output).lines();
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("reply within timeout")
        .unwrap();
    assert_eq!(line, Some("Aiko: Hi there!".to_string()));
    mock.assert_async().await;
}
