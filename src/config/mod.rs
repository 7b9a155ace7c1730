pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, OpenRouterConfig};
pub use loader::load_config;
