use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::entity::SceneEntity;
use crate::core::pipeline::Pipeline;
use crate::core::store::{ObjectStore, StoreError};
use crate::plugins::PipelineKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AprilTagOptions {
    /// A tag untouched for longer than this is removed on the next tick.
    pub staleness_ms: u64,
    /// Edge length of the rendered tag.
    pub size: f32,
}

impl Default for AprilTagOptions {
    fn default() -> Self {
        Self {
            staleness_ms: 2000,
            size: 1.0,
        }
    }
}

/// One detection as published by the tag detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDetection {
    pub tag_id: u32,
    pub pose_t: [f32; 3],
    /// Row-major 3x3 rotation.
    #[serde(rename = "pose_R")]
    pub pose_r: [f32; 9],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagDetections {
    pub tags: Vec<TagDetection>,
}

pub fn tag_key(tag_id: u32) -> String {
    format!("tag_{tag_id}")
}

/// Shows detected AprilTags and drops the ones that stop being reported.
pub struct AprilTagPipeline {
    staleness: Duration,
    size: f32,
    tracked: BTreeSet<u32>,
}

impl AprilTagPipeline {
    pub fn tracked(&self) -> impl Iterator<Item = u32> + '_ {
        self.tracked.iter().copied()
    }
}

impl PipelineKind for AprilTagPipeline {
    const KIND: &'static str = "apriltag";
    type Options = AprilTagOptions;

    fn from_options(options: AprilTagOptions) -> Self {
        Self {
            staleness: Duration::from_millis(options.staleness_ms),
            size: options.size,
            tracked: BTreeSet::new(),
        }
    }
}

#[async_trait]
impl Pipeline for AprilTagPipeline {
    fn name(&self) -> &str {
        "AprilTagPipeline"
    }

    async fn on_message(&mut self, store: &ObjectStore, payload: &[u8]) -> anyhow::Result<()> {
        let detections: TagDetections =
            serde_json::from_slice(payload).context("decoding tag detections")?;

        for tag in detections.tags {
            self.tracked.insert(tag.tag_id);
            let key = tag_key(tag.tag_id);
            let placed = store.update(&key, |entity| {
                entity.position = tag.pose_t.into();
                entity.set_rotation_matrix(&tag.pose_r);
            });
            if let Err(StoreError::Missing(_)) = placed {
                let mut entity = SceneEntity::tag(tag.tag_id, self.size).with_position(tag.pose_t.into());
                entity.set_rotation_matrix(&tag.pose_r);
                store.add(key, entity);
            }
        }
        Ok(())
    }

    fn on_tick(&mut self, store: &ObjectStore) -> anyhow::Result<()> {
        let mut forgotten = Vec::new();
        for &tag_id in &self.tracked {
            let key = tag_key(tag_id);
            match store.peek(&key) {
                Ok(object) if object.age() > self.staleness => {
                    debug!(tag_id, age_ms = object.age().as_millis() as u64, "removing stale tag");
                    // Someone else may have removed it first.
                    let _ = store.remove(&key);
                    forgotten.push(tag_id);
                }
                Ok(_) => {}
                Err(StoreError::Missing(_)) => forgotten.push(tag_id),
            }
        }
        for tag_id in forgotten {
            self.tracked.remove(&tag_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::Vec3;
    use crate::render::HeadlessRenderer;
    use std::sync::Arc;

    const IDENTITY: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

    fn payload(ids_and_positions: &[(u32, [f32; 3])]) -> Vec<u8> {
        let tags = ids_and_positions
            .iter()
            .map(|&(tag_id, pose_t)| TagDetection {
                tag_id,
                pose_t,
                pose_r: IDENTITY,
            })
            .collect();
        serde_json::to_vec(&TagDetections { tags }).unwrap()
    }

    fn pipeline(staleness_ms: u64) -> AprilTagPipeline {
        AprilTagPipeline::from_options(AprilTagOptions {
            staleness_ms,
            ..AprilTagOptions::default()
        })
    }

    #[tokio::test]
    async fn creates_then_moves_tags() {
        let store = ObjectStore::new(Arc::new(HeadlessRenderer::new()));
        let mut tags = pipeline(2000);

        tags.on_message(&store, &payload(&[(7, [1.0, 2.0, 3.0])])).await.unwrap();
        assert!(store.contains("tag_7"));

        tags.on_message(&store, &payload(&[(7, [4.0, 5.0, 6.0])])).await.unwrap();
        let object = store.peek("tag_7").unwrap();
        assert_eq!(object.entity.position, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(store.len(), 1);
        assert_eq!(tags.tracked().collect::<Vec<_>>(), vec![7]);
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let store = ObjectStore::new(Arc::new(HeadlessRenderer::new()));
        let mut tags = pipeline(2000);
        assert!(tags.on_message(&store, b"not json").await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_tags_are_swept_fresh_ones_kept() {
        let store = ObjectStore::new(Arc::new(HeadlessRenderer::new()));
        let mut tags = pipeline(2000);
        tags.on_message(&store, &payload(&[(1, [0.0; 3]), (2, [0.0; 3])])).await.unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        tags.on_message(&store, &payload(&[(2, [1.0, 0.0, 0.0])])).await.unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;

        tags.on_tick(&store).unwrap();
        assert!(!store.contains("tag_1"));
        assert!(store.contains("tag_2"));
        assert_eq!(tags.tracked().collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sweep_does_not_refresh_tags() {
        let store = ObjectStore::new(Arc::new(HeadlessRenderer::new()));
        let mut tags = pipeline(100);
        tags.on_message(&store, &payload(&[(3, [0.0; 3])])).await.unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(40)).await;
            tags.on_tick(&store).unwrap();
        }
        assert!(!store.contains("tag_3"));
    }

    #[tokio::test]
    async fn forgets_tags_removed_elsewhere() {
        let store = ObjectStore::new(Arc::new(HeadlessRenderer::new()));
        let mut tags = pipeline(2000);
        tags.on_message(&store, &payload(&[(9, [0.0; 3])])).await.unwrap();
        store.remove("tag_9").unwrap();

        tags.on_tick(&store).unwrap();
        assert_eq!(tags.tracked().count(), 0);
    }
}
