/// Core pipeline interface: turns bus payloads into scene-object mutations
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::store::ObjectStore;

/// Main trait every pipeline implements.
///
/// `on_message` is the only place a pipeline interprets payloads. It must not
/// block; the bus task awaits it before delivering the next message on the
/// same topic. `on_tick` runs once per dispatcher iteration regardless of
/// traffic and is where staleness sweeps and animations live.
#[async_trait]
pub trait Pipeline: Send {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    async fn on_message(&mut self, store: &ObjectStore, payload: &[u8]) -> anyhow::Result<()>;

    fn on_tick(&mut self, _store: &ObjectStore) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A pipeline instance shared between its bus subscriptions and the tick loop.
pub type SharedPipeline = Arc<Mutex<Box<dyn Pipeline>>>;

/// Builds a fresh pipeline instance for one dispatcher run.
pub type PipelineFactory = Arc<dyn Fn() -> Box<dyn Pipeline> + Send + Sync>;

pub fn share(pipeline: Box<dyn Pipeline>) -> SharedPipeline {
    Arc::new(Mutex::new(pipeline))
}
