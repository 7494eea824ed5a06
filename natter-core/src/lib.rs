// ABOUTME: Platform-agnostic turn coordination for persona chat bots
// ABOUTME: Decides when to reply, what memory to inject, and how to clean model output

pub mod chatter;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod paths;
pub mod persistence;
pub mod persona;
pub mod prompt;
pub mod sanitizer;
pub mod scheduler;
pub mod traits;

pub use chatter::{ChatterPolicy, IdleChatter};
pub use config::Config;
pub use coordinator::{CoordinatorConfig, TurnCoordinator, TurnPhase};
pub use error::BackendError;
pub use memory::{MemoryEntry, MemoryStore};
pub use persistence::{InMemoryPersistence, JsonFileMemory};
pub use persona::Persona;
pub use sanitizer::{sanitize, sanitize_all, SanitizeOptions};
pub use scheduler::{BackoffPolicy, TimerState, TurnScheduler};

// Re-export core traits for convenient access
pub use traits::{
    // Collaborators
    ChatSurface, GenerationBackend, MemoryPersistence, TypingProbe,
    // Data Types
    Channel, ChatMessage, EventStream, GenerationRequest, ReplyRef,
};
