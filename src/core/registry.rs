use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::core::pipeline::{Pipeline, PipelineFactory};
use crate::core::topic::{SceneDefaults, TopicSpec, WindowFilter};

/// Everything the dispatcher needs to bring one pipeline up.
#[derive(Clone)]
pub struct PipelineRegistration {
    /// Catalog kind the factory was built from, e.g. `apriltag`.
    pub kind: String,
    pub factory: PipelineFactory,
    pub window_filter: WindowFilter,
    pub scene_defaults: SceneDefaults,
}

impl PipelineRegistration {
    pub fn new(kind: impl Into<String>, factory: PipelineFactory) -> Self {
        Self {
            kind: kind.into(),
            factory,
            window_filter: WindowFilter::All,
            scene_defaults: SceneDefaults::default(),
        }
    }

    pub fn with_window_filter(mut self, window_filter: WindowFilter) -> Self {
        self.window_filter = window_filter;
        self
    }

    pub fn with_scene_defaults(mut self, scene_defaults: SceneDefaults) -> Self {
        self.scene_defaults = scene_defaults;
        self
    }

    pub fn instantiate(&self) -> Box<dyn Pipeline> {
        (self.factory)()
    }
}

impl fmt::Debug for PipelineRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRegistration")
            .field("kind", &self.kind)
            .field("window_filter", &self.window_filter)
            .field("scene_defaults", &self.scene_defaults)
            .finish_non_exhaustive()
    }
}

/// Topic-keyed table of pipeline registrations.
///
/// Last write wins: registering an equal `TopicSpec` again replaces the entry
/// but keeps its original position in registration order.
#[derive(Default)]
pub struct TopicRegistry {
    order: Vec<TopicSpec>,
    entries: HashMap<TopicSpec, PipelineRegistration>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns the registration that was replaced, if any.
    pub fn register(
        &mut self,
        spec: impl Into<TopicSpec>,
        registration: PipelineRegistration,
    ) -> Option<PipelineRegistration> {
        let spec = spec.into();
        match self.entries.insert(spec.clone(), registration) {
            Some(previous) => {
                debug!(topics = %spec, replaced = %previous.kind, "registration overwritten");
                Some(previous)
            }
            None => {
                self.order.push(spec);
                None
            }
        }
    }

    pub fn register_with(
        &mut self,
        spec: impl Into<TopicSpec>,
        kind: impl Into<String>,
        factory: PipelineFactory,
        window_filter: WindowFilter,
        scene_defaults: SceneDefaults,
    ) -> Option<PipelineRegistration> {
        let registration = PipelineRegistration::new(kind, factory)
            .with_window_filter(window_filter)
            .with_scene_defaults(scene_defaults);
        self.register(spec, registration)
    }

    pub fn extend(&mut self, registrations: impl IntoIterator<Item = (TopicSpec, PipelineRegistration)>) {
        for (spec, registration) in registrations {
            self.register(spec, registration);
        }
    }

    /// Snapshot of the table in registration order.
    pub fn all_registrations(&self) -> Vec<(TopicSpec, PipelineRegistration)> {
        self.order
            .iter()
            .filter_map(|spec| {
                self.entries
                    .get(spec)
                    .map(|registration| (spec.clone(), registration.clone()))
            })
            .collect()
    }

    pub fn get(&self, spec: &TopicSpec) -> Option<&PipelineRegistration> {
        self.entries.get(spec)
    }

    pub fn topics(&self) -> impl Iterator<Item = &TopicSpec> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::ObjectStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Named(&'static str);

    #[async_trait]
    impl Pipeline for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn on_message(&mut self, _store: &ObjectStore, _payload: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registration(kind: &'static str) -> PipelineRegistration {
        PipelineRegistration::new(kind, Arc::new(move || Box::new(Named(kind)) as Box<dyn Pipeline>))
    }

    #[test]
    fn string_and_sequence_share_a_key() {
        let mut registry = TopicRegistry::new();
        assert!(registry.register("a", registration("first")).is_none());
        let replaced = registry.register(TopicSpec::from(["a"]), registration("second"));

        assert_eq!(replaced.map(|r| r.kind), Some("first".to_string()));
        assert_eq!(registry.len(), 1);
        let all = registry.all_registrations();
        assert_eq!(all[0].1.kind, "second");
        assert_eq!(all[0].1.instantiate().name(), "second");
    }

    #[test]
    fn overwrite_keeps_registration_order() {
        let mut registry = TopicRegistry::new();
        registry.register("a", registration("a1"));
        registry.register("b", registration("b1"));
        registry.register("a", registration("a2"));

        let kinds: Vec<String> = registry
            .all_registrations()
            .into_iter()
            .map(|(_, r)| r.kind)
            .collect();
        assert_eq!(kinds, vec!["a2", "b1"]);
    }

    #[test]
    fn register_with_sets_metadata() {
        let mut registry = TopicRegistry::new();
        let factory = registration("k").factory;
        registry.register_with("t", "k", factory, WindowFilter::Single(2), SceneDefaults::default());
        let entry = registry.get(&TopicSpec::from("t")).unwrap();
        assert_eq!(entry.window_filter, WindowFilter::Single(2));
    }
}
