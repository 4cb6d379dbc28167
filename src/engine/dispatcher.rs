use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::bus::{Bus, BusError, MessageHandler};
use crate::core::network::TcpBus;
use crate::core::pipeline::{share, SharedPipeline};
use crate::core::registry::TopicRegistry;
use crate::core::store::ObjectStore;
use crate::core::topic::TopicSpec;
use crate::render::SceneRenderer;

/// Period of the tick loop unless configured otherwise.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(40);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot start without a bus connection: {0}")]
    BusConnection(#[source] BusError),
    #[error("failed to subscribe to '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BusError,
    },
}

/// Blocking, one-time bus connection that must succeed before anything subscribes.
pub async fn connect_bus(addr: &str) -> Result<TcpBus, DispatchError> {
    TcpBus::connect(addr).await.map_err(DispatchError::BusConnection)
}

struct ActivePipeline {
    topics: TopicSpec,
    kind: String,
    pipeline: SharedPipeline,
}

/// Brings up the pipelines visible in one window and keeps them ticking.
pub struct Dispatcher {
    window_index: u32,
    tick_period: Duration,
    active: Vec<ActivePipeline>,
}

impl Dispatcher {
    pub fn new(window_index: u32, tick_period: Duration) -> Self {
        Self {
            window_index,
            tick_period,
            active: Vec::new(),
        }
    }

    pub fn window_index(&self) -> u32 {
        self.window_index
    }

    /// Kinds of the running pipelines, in registration order.
    pub fn active_kinds(&self) -> Vec<&str> {
        self.active.iter().map(|a| a.kind.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Instantiates every visible registration and wires it to the bus.
    ///
    /// Scene defaults are applied here, once per visible registration, and
    /// never again. Returns how many pipelines were started.
    pub async fn subscribe_all(
        &mut self,
        registry: &TopicRegistry,
        bus: &dyn Bus,
        store: &Arc<ObjectStore>,
        renderer: &dyn SceneRenderer,
    ) -> Result<usize, DispatchError> {
        let window = self.window_index;
        let mut started = 0;

        for (topics, registration) in registry.all_registrations() {
            if !registration.window_filter.is_visible_in(window) {
                info!(
                    %topics,
                    kind = %registration.kind,
                    window,
                    shown_in = %registration.window_filter,
                    "skipping pipeline not shown in this window"
                );
                continue;
            }

            let pipeline = share(registration.instantiate());
            for topic in topics.topics() {
                let handler = message_handler(Arc::clone(&pipeline), Arc::clone(store), topic);
                bus.subscribe(topic, handler)
                    .await
                    .map_err(|source| DispatchError::Subscribe {
                        topic: topic.to_string(),
                        source,
                    })?;
            }

            if !registration.scene_defaults.is_empty() {
                renderer.apply_scene_defaults(&registration.scene_defaults);
            }

            info!(%topics, kind = %registration.kind, window, "loaded pipeline");
            self.active.push(ActivePipeline {
                topics,
                kind: registration.kind,
                pipeline,
            });
            started += 1;
        }

        if started == 0 {
            warn!(window, "no pipelines visible in this window");
        }
        Ok(started)
    }

    /// One pass of the tick loop: every pipeline, in registration order.
    pub async fn tick(&self, store: &ObjectStore) {
        for active in &self.active {
            let mut pipeline = active.pipeline.lock().await;
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| pipeline.on_tick(store)));
            report(pipeline.name(), &active.topics, "tick", outcome);
        }
    }

    /// Ticks forever at the configured period. Only process exit stops it.
    pub async fn run(self, store: Arc<ObjectStore>) -> Infallible {
        let mut interval = tokio::time::interval(self.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_ms = self.tick_period.as_millis() as u64, "tick loop started");
        loop {
            interval.tick().await;
            self.tick(&store).await;
        }
    }
}

/// Subscribes everything visible in `window_index` and enters the tick loop.
pub async fn dispatch(
    registry: &TopicRegistry,
    window_index: u32,
    bus: &dyn Bus,
    store: Arc<ObjectStore>,
    renderer: &dyn SceneRenderer,
    tick_period: Duration,
) -> Result<Infallible, DispatchError> {
    let mut dispatcher = Dispatcher::new(window_index, tick_period);
    dispatcher.subscribe_all(registry, bus, &store, renderer).await?;
    Ok(dispatcher.run(store).await)
}

fn message_handler(pipeline: SharedPipeline, store: Arc<ObjectStore>, topic: &str) -> MessageHandler {
    let topic = TopicSpec::single(topic);
    Arc::new(move |payload: Vec<u8>| {
        let pipeline = Arc::clone(&pipeline);
        let store = Arc::clone(&store);
        let topic = topic.clone();
        async move {
            let mut pipeline = pipeline.lock().await;
            let outcome = AssertUnwindSafe(pipeline.on_message(&store, &payload))
                .catch_unwind()
                .await;
            report(pipeline.name(), &topic, "message", outcome);
        }
        .boxed()
    })
}

fn report(
    pipeline: &str,
    topics: &TopicSpec,
    stage: &str,
    outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(pipeline, %topics, stage, error = %format!("{e:#}"), "pipeline handler failed");
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(pipeline, %topics, stage, panic = %message, "pipeline handler panicked");
        }
    }
}
