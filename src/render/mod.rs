/// Rendering collaborator seam
pub mod terminal;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::core::store::SceneObject;
use crate::core::topic::{AxesOptions, GridOptions, SceneDefaults};

pub use terminal::TerminalRenderer;

/// What the dispatcher and the object store need from a renderer.
pub trait SceneRenderer: Send + Sync {
    /// One-time axes/grid configuration requested by a registration.
    fn apply_scene_defaults(&self, defaults: &SceneDefaults);

    /// Called when an object leaves the store so its render resources can be freed.
    fn release(&self, object: &SceneObject);
}

/// Axes and grid visuals shared by every window renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneSettings {
    pub axes: AxesOptions,
    pub grid: GridOptions,
}

impl SceneSettings {
    pub fn apply(&mut self, defaults: &SceneDefaults) {
        if let Some(axes) = &defaults.axes {
            self.axes = axes.clone();
        }
        if let Some(grid) = &defaults.grid {
            self.grid = grid.clone();
        }
    }
}

/// Renderer that draws nothing. Used with `--headless` and in tests.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    settings: RwLock<SceneSettings>,
    released: AtomicUsize,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> SceneSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of handles released so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl SceneRenderer for HeadlessRenderer {
    fn apply_scene_defaults(&self, defaults: &SceneDefaults) {
        info!(?defaults, "applying scene defaults");
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(defaults);
    }

    fn release(&self, object: &SceneObject) {
        debug!(name = %object.name, "released scene object");
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_only_override_what_they_set() {
        let renderer = HeadlessRenderer::new();
        renderer.apply_scene_defaults(&SceneDefaults {
            axes: Some(AxesOptions {
                length: 3.0,
                ..AxesOptions::default()
            }),
            grid: None,
        });

        let settings = renderer.settings();
        assert_eq!(settings.axes.length, 3.0);
        assert_eq!(settings.grid, GridOptions::default());
    }
}
