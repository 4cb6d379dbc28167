/// Named scene objects with last-touch timestamps
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::core::entity::SceneEntity;
use crate::render::SceneRenderer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no scene object named '{0}'")]
    Missing(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub entity: SceneEntity,
    pub last_touch: Instant,
}

impl SceneObject {
    /// Time since the object was last added, touched or updated.
    pub fn age(&self) -> std::time::Duration {
        Instant::now().saturating_duration_since(self.last_touch)
    }
}

/// Shared registry of scene objects.
///
/// Every operation takes the internal lock for its own duration only, so the
/// message handlers and the tick loop can both hold an `Arc<ObjectStore>`.
/// The store never evicts on its own; pipelines decide when something is stale.
pub struct ObjectStore {
    objects: Mutex<HashMap<String, SceneObject>>,
    renderer: Arc<dyn SceneRenderer>,
}

impl ObjectStore {
    pub fn new(renderer: Arc<dyn SceneRenderer>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            renderer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SceneObject>> {
        // A panicking pipeline must not take the whole scene down with it.
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Inserts `entity` under `name`, replacing (and releasing) any previous one.
    pub fn add(&self, name: impl Into<String>, entity: SceneEntity) {
        let name = name.into();
        let object = SceneObject {
            name: name.clone(),
            entity,
            last_touch: Instant::now(),
        };
        let replaced = self.lock().insert(name, object);
        if let Some(old) = replaced {
            debug!(name = %old.name, "replaced scene object");
            self.renderer.release(&old);
        }
    }

    /// Touches the object and returns a copy of it.
    pub fn get(&self, name: &str) -> Result<SceneObject, StoreError> {
        let mut objects = self.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| StoreError::Missing(name.to_string()))?;
        object.last_touch = Instant::now();
        Ok(object.clone())
    }

    /// Returns a copy of the object without refreshing its timestamp.
    pub fn peek(&self, name: &str) -> Result<SceneObject, StoreError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Missing(name.to_string()))
    }

    pub fn touch(&self, name: &str) -> Result<Instant, StoreError> {
        let mut objects = self.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| StoreError::Missing(name.to_string()))?;
        object.last_touch = Instant::now();
        Ok(object.last_touch)
    }

    /// Mutates the entity in place under the store lock and touches it.
    pub fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SceneEntity) -> R,
    ) -> Result<R, StoreError> {
        let mut objects = self.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| StoreError::Missing(name.to_string()))?;
        object.last_touch = Instant::now();
        Ok(f(&mut object.entity))
    }

    /// Deletes the object and releases its render handle. Missing names are an error.
    pub fn remove(&self, name: &str) -> Result<SceneObject, StoreError> {
        let removed = self
            .lock()
            .remove(name)
            .ok_or_else(|| StoreError::Missing(name.to_string()))?;
        self.renderer.release(&removed);
        Ok(removed)
    }

    pub fn clear(&self) {
        let drained: Vec<SceneObject> = self.lock().drain().map(|(_, object)| object).collect();
        for object in &drained {
            self.renderer.release(object);
        }
    }

    /// Copies of every object, sorted by name.
    pub fn snapshot(&self) -> Vec<SceneObject> {
        let mut objects: Vec<SceneObject> = self.lock().values().cloned().collect();
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        objects
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{EntityKind, Vec3};
    use crate::render::HeadlessRenderer;
    use std::time::Duration;

    fn store() -> (ObjectStore, Arc<HeadlessRenderer>) {
        let renderer = Arc::new(HeadlessRenderer::new());
        (ObjectStore::new(renderer.clone()), renderer)
    }

    #[test]
    fn add_then_get_returns_the_entity() {
        let (store, _) = store();
        let entity = SceneEntity::tag(3, 1.0);
        store.add("x", entity.clone());

        assert!(store.contains("x"));
        let object = store.get("x").unwrap();
        assert_eq!(object.name, "x");
        assert_eq!(object.entity, entity);
    }

    #[test]
    fn get_refreshes_timestamp_across_real_delay() {
        let (store, _) = store();
        store.add("x", SceneEntity::cube(crate::core::topic::Rgb::BLUE));

        let first = store.get("x").unwrap().last_touch;
        std::thread::sleep(Duration::from_millis(5));
        let second = store.get("x").unwrap().last_touch;
        assert!(second > first);
    }

    #[test]
    fn peek_does_not_touch() {
        let (store, _) = store();
        store.add("x", SceneEntity::new(EntityKind::Cube));
        let added = store.peek("x").unwrap().last_touch;
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.peek("x").unwrap().last_touch, added);

        let touched = store.touch("x").unwrap();
        assert!(touched > added);
    }

    #[test]
    fn missing_names_fail_loudly() {
        let (store, renderer) = store();
        assert_eq!(store.get("nope"), Err(StoreError::Missing("nope".into())));
        assert!(store.peek("nope").is_err());
        assert!(store.touch("nope").is_err());
        assert!(store.remove("nope").is_err());
        assert_eq!(renderer.released(), 0);
    }

    #[test]
    fn remove_releases_the_handle() {
        let (store, renderer) = store();
        store.add("x", SceneEntity::new(EntityKind::Cube));
        let removed = store.remove("x").unwrap();
        assert_eq!(removed.name, "x");
        assert!(!store.contains("x"));
        assert_eq!(renderer.released(), 1);
    }

    #[test]
    fn add_overwrites_and_releases_previous() {
        let (store, renderer) = store();
        store.add("x", SceneEntity::tag(1, 1.0));
        store.add("x", SceneEntity::tag(2, 1.0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.peek("x").unwrap().entity.kind, EntityKind::Tag { id: 2 });
        assert_eq!(renderer.released(), 1);
    }

    #[test]
    fn update_mutates_in_place() {
        let (store, _) = store();
        store.add("x", SceneEntity::new(EntityKind::Cube));
        store
            .update("x", |entity| entity.position = Vec3::new(1.0, 2.0, 3.0))
            .unwrap();
        assert_eq!(store.peek("x").unwrap().entity.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(store.update("y", |_| ()).is_err());
    }

    #[test]
    fn clear_releases_everything() {
        let (store, renderer) = store();
        store.add("a", SceneEntity::new(EntityKind::Cube));
        store.add("b", SceneEntity::new(EntityKind::Cube));
        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(renderer.released(), 2);
    }

    #[test]
    fn concurrent_updates_to_one_object_are_not_lost() {
        let (store, _) = store();
        store.add("shared", SceneEntity::cube(crate::core::topic::Rgb::BLUE));

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        store
                            .update("shared", |entity| entity.position.x += 1.0)
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.peek("shared").unwrap().entity.position.x, 1000.0);
        assert_eq!(store.len(), 1);
    }
}
