// ABOUTME: Wires config, persona, memory, backend and a chat surface into a running bot
// ABOUTME: Shared by the binary and integration tests so startup is exercised end to end

use crate::backends::BackendRegistry;
use anyhow::{Context, Result};
use natter_core::chatter::{ChatterPolicy, IdleChatter};
use natter_core::config::Config;
use natter_core::coordinator::{CoordinatorConfig, TurnCoordinator};
use natter_core::memory::MemoryStore;
use natter_core::persistence::JsonFileMemory;
use natter_core::persona::Persona;
use natter_core::traits::{ChatSurface, MemoryPersistence};
use std::path::Path;
use std::sync::Arc;

pub struct App {
    coordinator: TurnCoordinator,
    chatter: Option<IdleChatter>,
}

impl App {
    /// Load the persona named by the config
    pub fn load_persona(config: &Config) -> Result<Persona> {
        let persona = Persona::from_file(Path::new(&config.persona.character_path))
            .with_context(|| {
                format!(
                    "Failed to load persona from {}",
                    config.persona.character_path
                )
            })?;
        tracing::info!(persona = %persona.name, "Persona loaded");
        Ok(persona)
    }

    /// Load the persona's memory, build the backend and coordinator
    pub async fn build(
        config: &Config,
        registry: &BackendRegistry,
        surface: Arc<dyn ChatSurface>,
        persona: Persona,
    ) -> Result<Self> {
        let backend = registry.create_from_config(&config.backend)?;

        let persistence: Arc<dyn MemoryPersistence> =
            Arc::new(JsonFileMemory::new(&config.memory.dir));
        let memory = MemoryStore::load(persona.name.clone(), persistence).await;

        let coordinator = TurnCoordinator::new(
            surface,
            backend,
            persona,
            memory,
            CoordinatorConfig::from(config),
        );

        let chatter = config
            .chatter
            .enabled
            .then(|| IdleChatter::new(coordinator.clone(), ChatterPolicy::from_config(config)));

        Ok(Self {
            coordinator,
            chatter,
        })
    }

    pub fn coordinator(&self) -> &TurnCoordinator {
        &self.coordinator
    }

    pub fn chatter_enabled(&self) -> bool {
        self.chatter.is_some()
    }

    /// Run until the event stream ends or Ctrl-C, then save memory.
    ///
    /// When input ends, turns already scheduled still get to reply first.
    pub async fn run(self) -> Result<()> {
        let chatter_task = self.chatter.map(|chatter| {
            tracing::info!(
                poll_secs = chatter.policy().poll.as_secs(),
                "Idle chatter enabled"
            );
            chatter.spawn()
        });

        let coordinator = &self.coordinator;
        let drained = async {
            let result = coordinator.run().await;
            if let Some(task) = &chatter_task {
                task.abort();
            }
            tracing::debug!("Waiting for pending turns to finish");
            coordinator.wait_idle().await;
            result
        };

        tokio::select! {
            result = drained => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Event loop failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
            }
        }

        if let Some(task) = chatter_task {
            task.abort();
        }
        self.coordinator
            .save_memory()
            .await
            .context("Failed to save memory on shutdown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleSurface;

    #[tokio::test]
    async fn test_build_wires_persona_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let card = dir.path().join("aiko.json");
        std::fs::write(&card, r#"{"name": "Aiko", "description": "A cheerful girl"}"#).unwrap();
        std::fs::create_dir_all(dir.path().join("memory")).unwrap();
        std::fs::write(
            dir.path().join("memory/Aiko.json"),
            r#"[{"content": "{{key}} likes tea", "keys": ["coffee"]}]"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.persona.character_path = card.to_string_lossy().to_string();
        config.memory.dir = dir.path().join("memory").to_string_lossy().to_string();
        config.backend.backend_type = "kobold".to_string();
        config.chatter.enabled = false;

        let surface = Arc::new(ConsoleSurface::with_io(
            &config.console,
            "Aiko",
            tokio::io::empty(),
            tokio::io::sink(),
        ));
        let persona = App::load_persona(&config).unwrap();
        let app = App::build(&config, &BackendRegistry::default(), surface, persona)
            .await
            .unwrap();

        assert_eq!(app.coordinator().persona().name, "Aiko");
        assert!(!app.chatter_enabled());
    }

    struct CannedBackend;

    #[async_trait::async_trait]
    impl natter_core::traits::GenerationBackend for CannedBackend {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn generate_replies(
            &self,
            _request: natter_core::traits::GenerationRequest<'_>,
        ) -> Result<Vec<String>, natter_core::BackendError> {
            Ok(vec!["Aiko: Oh, hi!".to_string()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_replies_to_piped_input_before_exiting() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.memory.dir = dir.path().to_string_lossy().to_string();
        config.backend.backend_type = "canned".to_string();
        config.chatter.enabled = false;

        let (writer, output) = tokio::io::duplex(4096);
        let surface = Arc::new(ConsoleSurface::with_io(
            &config.console,
            "Aiko",
            std::io::Cursor::new(b"hello\n".to_vec()),
            writer,
        ));
        let registry = BackendRegistry::new().register("canned", |_config| {
            let backend: Arc<dyn natter_core::traits::GenerationBackend> = Arc::new(CannedBackend);
            Ok(backend)
        });
        let app = App::build(&config, &registry, surface, Persona::new("Aiko"))
            .await
            .unwrap();
        let coordinator = app.coordinator().clone();

        app.run().await.unwrap();

        assert_eq!(
            coordinator.phase(&config.console.channel_id),
            natter_core::TurnPhase::Idle
        );
        let mut lines = BufReader::new(output).lines();
        assert_eq!(
            lines.next_line().await.unwrap(),
            Some("Aiko: Oh, hi!".to_string())
        );
    }

    #[test]
    fn test_load_persona_fails_on_missing_card() {
        let mut config = Config::default();
        config.persona.character_path = "/nonexistent/card.json".to_string();
        let err = App::load_persona(&config).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/card.json"));
    }

    #[tokio::test]
    async fn test_build_fails_on_unknown_backend() {
        let mut config = Config::default();
        config.backend.backend_type = "carrier-pigeon".to_string();
        let surface = Arc::new(ConsoleSurface::with_io(
            &config.console,
            "Aiko",
            tokio::io::empty(),
            tokio::io::sink(),
        ));
        assert!(
            App::build(&config, &BackendRegistry::default(), surface, Persona::new("Aiko"))
                .await
                .is_err()
        );
    }
}
