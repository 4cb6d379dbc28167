use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::core::pipeline::{Pipeline, PipelineFactory};
use crate::plugins::PluginLoadError;

/// A pipeline type that plugin manifests can refer to by name.
pub trait PipelineKind: Pipeline + Sized + 'static {
    /// Name used in the `kind = "..."` field of a manifest.
    const KIND: &'static str;

    /// Deserialized from the entry's `[pipeline.options]` table, which may be empty.
    type Options: DeserializeOwned + Clone + Send + Sync + 'static;

    fn from_options(options: Self::Options) -> Self;
}

/// Turns the raw options table of a manifest entry into a factory.
pub type FactoryBuilder = fn(toml::Table) -> Result<PipelineFactory, toml::de::Error>;

fn build_factory<P: PipelineKind>(options: toml::Table) -> Result<PipelineFactory, toml::de::Error> {
    let options: P::Options = toml::Value::Table(options).try_into()?;
    Ok(Arc::new(move || Box::new(P::from_options(options.clone())) as Box<dyn Pipeline>))
}

/// Pipeline kinds compiled into this binary, keyed by kind name.
#[derive(Clone, Default)]
pub struct PipelineCatalog {
    kinds: BTreeMap<String, FactoryBuilder>,
}

impl PipelineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: PipelineKind>(&mut self) {
        self.kinds.insert(P::KIND.to_string(), build_factory::<P>);
    }

    pub fn register_builder(&mut self, kind: impl Into<String>, builder: FactoryBuilder) {
        self.kinds.insert(kind.into(), builder);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Validates `options` for `kind` and returns a factory for it.
    pub fn build(&self, kind: &str, options: toml::Table) -> Result<PipelineFactory, PluginLoadError> {
        let builder = self.kinds.get(kind).ok_or_else(|| PluginLoadError::UnknownKind {
            kind: kind.to_string(),
            known: self.kinds().collect::<Vec<_>>().join(", "),
        })?;
        builder(options).map_err(|source| PluginLoadError::Options {
            kind: kind.to_string(),
            source,
        })
    }
}

/// Declares the built-in catalog.
///
/// Usage in pipelines/mod.rs:
/// ```ignore
/// pipeline_catalog! {
///     apriltag => AprilTagPipeline,
///     image => ImagePipeline,
/// }
/// ```
#[macro_export]
macro_rules! pipeline_catalog {
    ( $( $module:ident => $pipeline:ident ),* $(,)? ) => {
        /// Every pipeline kind compiled into this build
        pub fn builtin_catalog() -> $crate::plugins::catalog::PipelineCatalog {
            let mut catalog = $crate::plugins::catalog::PipelineCatalog::new();
            $(
                catalog.register::<$crate::pipelines::$module::$pipeline>();
            )*
            catalog
        }

        /// Names of the built-in kinds
        pub fn builtin_kinds() -> Vec<&'static str> {
            vec![
                $(
                    <$crate::pipelines::$module::$pipeline as $crate::plugins::catalog::PipelineKind>::KIND
                ),*
            ]
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::ObjectStore;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Clone, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct EchoOptions {
        label: String,
    }

    struct Echo {
        label: String,
    }

    #[async_trait]
    impl Pipeline for Echo {
        fn name(&self) -> &str {
            &self.label
        }

        async fn on_message(&mut self, _store: &ObjectStore, _payload: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl PipelineKind for Echo {
        const KIND: &'static str = "echo";
        type Options = EchoOptions;

        fn from_options(options: EchoOptions) -> Self {
            Echo { label: options.label }
        }
    }

    #[test]
    fn builds_with_options() {
        let mut catalog = PipelineCatalog::new();
        catalog.register::<Echo>();

        let options: toml::Table = toml::from_str(r#"label = "hi""#).unwrap();
        let factory = catalog.build("echo", options).unwrap();
        assert_eq!(factory().name(), "hi");
        assert_eq!(catalog.build("echo", toml::Table::new()).unwrap()().name(), "");
    }

    #[test]
    fn unknown_kind_and_bad_options_fail() {
        let mut catalog = PipelineCatalog::new();
        catalog.register::<Echo>();

        assert!(matches!(
            catalog.build("nope", toml::Table::new()),
            Err(PluginLoadError::UnknownKind { .. })
        ));
        let bad: toml::Table = toml::from_str("colour = 3").unwrap();
        assert!(matches!(
            catalog.build("echo", bad),
            Err(PluginLoadError::Options { .. })
        ));
    }
}
