/// Plugin discovery and loading
pub mod catalog;
pub mod manifest;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::core::registry::{PipelineRegistration, TopicRegistry};
use crate::core::topic::TopicSpec;

pub use catalog::{PipelineCatalog, PipelineKind};
pub use manifest::PluginManifest;

/// Package-marker file skipped in every plugin directory by default.
pub const PACKAGE_MARKER: &str = "mod.toml";

pub const PLUGIN_EXTENSION: &str = "toml";

#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid plugin manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown pipeline kind '{kind}' (known kinds: {known})")]
    UnknownKind { kind: String, known: String },
    #[error("invalid options for pipeline kind '{kind}': {source}")]
    Options {
        kind: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDirectory {
    pub path: PathBuf,
    pub exclude: BTreeSet<String>,
}

impl PluginDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exclude: BTreeSet::from([PACKAGE_MARKER.to_string()]),
        }
    }

    /// Replaces the exclusion list.
    pub fn with_exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_excluded(&self, file: &Path) -> bool {
        file.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.exclude.contains(name))
    }

    /// Plugin files in this directory, sorted by name, minus exclusions.
    pub fn candidates(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let path = entry?.path();
            let is_plugin = path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(PLUGIN_EXTENSION);
            if is_plugin && !self.is_excluded(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Outcome of one [`PluginLoader::load`] call.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, PluginLoadError)>,
    pub missing_directories: Vec<PathBuf>,
    pub registrations: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.missing_directories.is_empty()
    }
}

/// Loads TOML manifests from plugin directories.
///
/// Each manifest names pipeline kinds from the [`PipelineCatalog`] and binds
/// them to topics. Loading one file never affects another: a broken manifest
/// is logged, recorded in the [`LoadReport`] and skipped.
pub struct PluginLoader {
    catalog: PipelineCatalog,
}

impl PluginLoader {
    pub fn new(catalog: PipelineCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    /// Parses one manifest into registrations. Either every entry resolves or
    /// the whole file is rejected.
    pub fn load_file(&self, path: &Path) -> Result<Vec<(TopicSpec, PipelineRegistration)>, PluginLoadError> {
        let source = std::fs::read_to_string(path).map_err(|source| PluginLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_source(&source)
    }

    pub fn load_source(&self, source: &str) -> Result<Vec<(TopicSpec, PipelineRegistration)>, PluginLoadError> {
        let manifest = PluginManifest::parse(source)?;
        manifest
            .pipelines
            .into_iter()
            .map(|entry| {
                let scene_defaults = entry.scene_defaults();
                let factory = self.catalog.build(&entry.kind, entry.options)?;
                let registration = PipelineRegistration::new(entry.kind, factory)
                    .with_window_filter(entry.windows)
                    .with_scene_defaults(scene_defaults);
                Ok((entry.topic, registration))
            })
            .collect()
    }

    /// Loads every directory in order into `registry`. Never fails; problems
    /// end up in the returned report.
    pub fn load(&self, directories: &[PluginDirectory], registry: &mut TopicRegistry) -> LoadReport {
        let mut report = LoadReport::default();

        for directory in directories {
            if !directory.path.exists() {
                warn!(path = %directory.path.display(), "plugin directory does not exist");
                report.missing_directories.push(directory.path.clone());
                continue;
            }

            info!(path = %directory.path.display(), "loading plugins");
            let files = match directory.candidates() {
                Ok(files) => files,
                Err(source) => {
                    warn!(path = %directory.path.display(), error = %source, "cannot list plugin directory");
                    report.failed.push((
                        directory.path.clone(),
                        PluginLoadError::Io {
                            path: directory.path.clone(),
                            source,
                        },
                    ));
                    continue;
                }
            };

            for file in files {
                match self.load_file(&file) {
                    Ok(registrations) => {
                        if registrations.is_empty() {
                            warn!(file = %file.display(), "plugin registers no pipelines");
                        }
                        info!(file = %file.display(), pipelines = registrations.len(), "loaded plugin");
                        report.registrations += registrations.len();
                        registry.extend(registrations);
                        report.loaded.push(file);
                    }
                    Err(e) => {
                        warn!(file = %file.display(), error = %e, "failed to load plugin");
                        report.failed.push((file, e));
                    }
                }
            }
        }

        report
    }
}
