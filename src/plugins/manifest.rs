/// On-disk plugin format
use serde::Deserialize;

use crate::core::topic::{AxesOptions, GridOptions, SceneDefaults, TopicSpec, WindowFilter};

/// One plugin file: any number of `[[pipeline]]` entries.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineEntry {
    /// A single topic or a list of topics.
    #[serde(alias = "topics")]
    pub topic: TopicSpec,
    pub kind: String,
    #[serde(default)]
    pub windows: WindowFilter,
    #[serde(default)]
    pub axes: Option<AxesOptions>,
    #[serde(default)]
    pub grid: Option<GridOptions>,
    /// Kind-specific settings, validated by the catalog.
    #[serde(default)]
    pub options: toml::Table,
}

impl PipelineEntry {
    pub fn scene_defaults(&self) -> SceneDefaults {
        SceneDefaults {
            axes: self.axes.clone(),
            grid: self.grid.clone(),
        }
    }
}

impl PluginManifest {
    pub fn parse(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
