use anyhow::{ensure, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::entity::{EntityKind, SceneEntity, Vec3};
use crate::core::pipeline::Pipeline;
use crate::core::store::{ObjectStore, StoreError};
use crate::plugins::PipelineKind;

/// Raw camera frame, postcard encoded on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl ImageFrame {
    pub fn decode(payload: &[u8]) -> anyhow::Result<Self> {
        let frame: ImageFrame = postcard::from_bytes(payload).context("decoding image frame")?;
        frame.validate()?;
        Ok(frame)
    }

    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.width > 0 && self.height > 0, "image has no pixels");
        ensure!(
            matches!(self.channels, 1 | 3 | 4),
            "unsupported channel count {}",
            self.channels
        );
        let expected = self.width as usize * self.height as usize * self.channels as usize;
        ensure!(
            self.pixels.len() == expected,
            "expected {expected} bytes for {}x{}x{}, got {}",
            self.width,
            self.height,
            self.channels,
            self.pixels.len()
        );
        Ok(())
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageOptions {
    pub object_name: String,
    pub scale: f32,
    pub position: [f32; 3],
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            object_name: "image".to_string(),
            scale: 10.0,
            position: [0.0, 1.0, 5.0],
        }
    }
}

/// Keeps one image plane in the scene showing the latest frame.
pub struct ImagePipeline {
    options: ImageOptions,
    frames: u64,
}

impl ImagePipeline {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl PipelineKind for ImagePipeline {
    const KIND: &'static str = "image";
    type Options = ImageOptions;

    fn from_options(options: ImageOptions) -> Self {
        Self { options, frames: 0 }
    }
}

#[async_trait]
impl Pipeline for ImagePipeline {
    fn name(&self) -> &str {
        "ImagePipeline"
    }

    async fn on_message(&mut self, store: &ObjectStore, payload: &[u8]) -> anyhow::Result<()> {
        let frame = ImageFrame::decode(payload)?;
        self.frames += 1;
        debug!(frame = self.frames, width = frame.width, height = frame.height, "processed image");

        let kind = EntityKind::Image {
            width: frame.width,
            height: frame.height,
        };
        let label = format!("{}x{}", frame.width, frame.height);
        let updated = store.update(&self.options.object_name, |entity| {
            entity.kind = kind.clone();
            entity.label = Some(label.clone());
        });
        if let Err(StoreError::Missing(_)) = updated {
            let entity = SceneEntity {
                scale: self.options.scale,
                label: Some(label),
                ..SceneEntity::new(kind).with_position(Vec3::from(self.options.position))
            };
            store.add(self.options.object_name.clone(), entity);
        }
        Ok(())
    }
}
