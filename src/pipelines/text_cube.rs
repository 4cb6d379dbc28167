use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::core::entity::{SceneEntity, Vec3};
use crate::core::pipeline::Pipeline;
use crate::core::store::ObjectStore;
use crate::core::topic::Rgb;
use crate::plugins::PipelineKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextCubeOptions {
    pub object_name: String,
    pub color: Rgb,
    /// Degrees of yaw added every tick.
    pub spin: f32,
}

impl Default for TextCubeOptions {
    fn default() -> Self {
        Self {
            object_name: "example_object".to_string(),
            color: Rgb::BLUE,
            spin: 1.0,
        }
    }
}

/// Starting point for custom pipelines: any UTF-8 message places a cube,
/// every later one nudges it along x, and ticks keep it spinning.
pub struct TextCubePipeline {
    options: TextCubeOptions,
    received: u64,
}

impl PipelineKind for TextCubePipeline {
    const KIND: &'static str = "text_cube";
    type Options = TextCubeOptions;

    fn from_options(options: TextCubeOptions) -> Self {
        Self { options, received: 0 }
    }
}

#[async_trait]
impl Pipeline for TextCubePipeline {
    fn name(&self) -> &str {
        "TextCubePipeline"
    }

    async fn on_message(&mut self, store: &ObjectStore, payload: &[u8]) -> anyhow::Result<()> {
        let text = std::str::from_utf8(payload).context("payload is not UTF-8")?;
        debug!(%text, "received text");

        let name = &self.options.object_name;
        if store.contains(name) {
            let x = (self.received % 10) as f32;
            store.update(name, |entity| entity.position = Vec3::new(x, 0.0, 0.0))?;
        } else {
            store.add(name.clone(), SceneEntity::cube(self.options.color));
        }
        self.received += 1;
        Ok(())
    }

    fn on_tick(&mut self, store: &ObjectStore) -> anyhow::Result<()> {
        let name = &self.options.object_name;
        if store.contains(name) {
            let spin = self.options.spin;
            store.update(name, |entity| entity.rotation.y = (entity.rotation.y + spin) % 360.0)?;
        }
        Ok(())
    }
}
