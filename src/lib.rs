// ABOUTME: Root library module for the natter binary
// ABOUTME: Provides the console surface, HTTP generation backends, and startup wiring

pub mod app;
pub mod backends;
pub mod console;

// Re-export platform-agnostic modules from natter-core
pub use natter_core::config;
pub use natter_core::metrics;
pub use natter_core::paths;

pub use backends::BackendRegistry;
pub use console::ConsoleSurface;
