pub mod core;
pub mod engine;
pub mod plugins;
pub mod pipelines;
pub mod render;

pub mod cli;
pub mod config;
pub mod launcher;

// Re-export for convenience
pub use crate::core::pipeline::Pipeline;
pub use crate::core::registry::{PipelineRegistration, TopicRegistry};
pub use crate::core::store::ObjectStore;
pub use crate::core::topic::{TopicSpec, WindowFilter};
pub use crate::engine::Dispatcher;
pub use crate::plugins::{PluginDirectory, PluginLoader};
