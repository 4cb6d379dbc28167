use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::core::bus::Bus;
use crate::core::registry::TopicRegistry;
use crate::core::store::ObjectStore;
use crate::engine::dispatcher::{connect_bus, dispatch};
use crate::pipelines::builtin_catalog;
use crate::plugins::{LoadReport, PluginLoader};
use crate::render::{HeadlessRenderer, SceneRenderer, TerminalRenderer};

#[derive(Parser)]
#[command(name = "topicscene")]
#[command(about = "Live 3D scene windows fed by pub/sub topics")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open one scene window (the default)
    Window(WindowArgs),
    /// Open several windows, one process each
    Launch {
        /// Number of windows to open (defaults to `window.count` from the config)
        #[arg(long)]
        windows: Option<u32>,

        #[command(flatten)]
        args: WindowArgs,
    },
    /// Load the plugins and list the registered topics
    List(WindowArgs),
    /// Publish one message on the bus
    Publish {
        topic: String,

        /// Message body as text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        data: Option<String>,

        /// Read the message body from a file
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        args: WindowArgs,
    },
}

/// Options shared by every subcommand that opens a window or reads plugins.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct WindowArgs {
    /// TOML config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub window_width: Option<u32>,

    #[arg(long)]
    pub window_height: Option<u32>,

    /// X offset between multiple windows
    #[arg(long)]
    pub window_x_offset: Option<u32>,

    /// Y offset between multiple windows
    #[arg(long)]
    pub window_y_offset: Option<u32>,

    #[arg(long)]
    pub window_borderless: bool,

    #[arg(long)]
    pub window_resizable: bool,

    /// Index of this window, matched against each plugin's `windows`
    #[arg(long)]
    pub window_index: Option<u32>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Plugin directory, may be repeated; later directories win on topic clashes
    #[arg(long = "plugin-dir")]
    pub plugin_dirs: Vec<PathBuf>,

    /// File name to skip while loading plugins, added to `mod.toml`
    #[arg(long = "plugin-exclude")]
    pub plugin_exclude: Vec<String>,

    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Log only, without the terminal view
    #[arg(long)]
    pub headless: bool,
}

impl WindowArgs {
    /// Config file values with these flags laid over them.
    pub fn resolve(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };

        let window = &mut config.window;
        if let Some(width) = self.window_width {
            window.width = width;
        }
        if let Some(height) = self.window_height {
            window.height = height;
        }
        if let Some(offset) = self.window_x_offset {
            window.x_offset = offset;
        }
        if let Some(offset) = self.window_y_offset {
            window.y_offset = offset;
        }
        if let Some(index) = self.window_index {
            window.index = index;
        }
        window.borderless |= self.window_borderless;
        window.resizable |= self.window_resizable;

        if let Some(host) = &self.host {
            config.bus.host = host.clone();
        }
        if let Some(port) = self.port {
            config.bus.port = port;
        }

        if !self.plugin_dirs.is_empty() {
            config.plugins.directories = self.plugin_dirs.clone();
        }
        for name in &self.plugin_exclude {
            if !config.plugins.exclude.contains(name) {
                config.plugins.exclude.push(name.clone());
            }
        }

        if let Some(tick_ms) = self.tick_ms {
            config.tick_ms = tick_ms;
        }
        config.headless |= self.headless;
        Ok(config)
    }

    /// Turns the options back into flags, minus `--window-index`, for child processes.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: String| {
            args.push(format!("--{flag}"));
            args.push(value);
        };

        if let Some(path) = &self.config {
            push("config", path.display().to_string());
        }
        if let Some(v) = self.window_width {
            push("window-width", v.to_string());
        }
        if let Some(v) = self.window_height {
            push("window-height", v.to_string());
        }
        if let Some(v) = self.window_x_offset {
            push("window-x-offset", v.to_string());
        }
        if let Some(v) = self.window_y_offset {
            push("window-y-offset", v.to_string());
        }
        if let Some(host) = &self.host {
            push("host", host.clone());
        }
        if let Some(v) = self.port {
            push("port", v.to_string());
        }
        for dir in &self.plugin_dirs {
            push("plugin-dir", dir.display().to_string());
        }
        for name in &self.plugin_exclude {
            push("plugin-exclude", name.clone());
        }
        if let Some(v) = self.tick_ms {
            push("tick-ms", v.to_string());
        }

        if self.window_borderless {
            args.push("--window-borderless".to_string());
        }
        if self.window_resizable {
            args.push("--window-resizable".to_string());
        }
        if self.headless {
            args.push("--headless".to_string());
        }
        args
    }
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Window(WindowArgs::default())) {
        Commands::Window(args) => {
            let config = args.resolve()?;
            if config.headless {
                init_logging(None)?;
            } else {
                init_logging(Some(log_file_name(config.window.index)))?;
            }
            run_window(config).await?;
        }

        Commands::Launch { windows, args } => {
            init_logging(None)?;
            let config = args.resolve()?;
            let windows = windows.unwrap_or(config.window.count);
            crate::launcher::launch(windows, &args).await?;
        }

        Commands::List(args) => {
            init_logging(None)?;
            let config = args.resolve()?;
            let mut registry = TopicRegistry::new();
            let report = load_plugins(&config, &mut registry);

            println!("Registered topics ({}):", registry.len());
            println!();
            for (topics, registration) in registry.all_registrations() {
                println!("  {topics}");
                println!("     kind: {}", registration.kind);
                println!("     windows: {}", registration.window_filter);
            }
            if !report.failed.is_empty() {
                println!();
                println!("Failed plugins:");
                for (path, error) in &report.failed {
                    println!("  {}: {error}", path.display());
                }
            }
        }

        Commands::Publish { topic, data, file, args } => {
            init_logging(None)?;
            let config = args.resolve()?;
            let payload = match (data, file) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("nothing to publish, pass --data or --file"),
            };

            let bus = connect_bus(&config.bus.addr()).await?;
            let bytes = payload.len();
            bus.publish(&topic, payload).await?;
            info!(%topic, bytes, "published");
        }
    }

    Ok(())
}

pub fn log_file_name(window_index: u32) -> PathBuf {
    PathBuf::from(format!("topicscene-window-{window_index}.log"))
}

/// Logs to stderr, or to `log_file` when the terminal is taken by the scene view.
fn init_logging(log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("topicscene=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn load_plugins(config: &AppConfig, registry: &mut TopicRegistry) -> LoadReport {
    let loader = PluginLoader::new(builtin_catalog());
    let directories = config.plugins.plugin_directories();
    if directories.is_empty() {
        warn!("no plugin directories configured");
    }

    let report = loader.load(&directories, registry);
    info!(
        loaded = report.loaded.len(),
        failed = report.failed.len(),
        registrations = report.registrations,
        topics = registry.len(),
        "plugins loaded"
    );
    report
}

async fn run_window(config: AppConfig) -> anyhow::Result<()> {
    let window = &config.window;
    info!(
        index = window.index,
        width = window.width,
        height = window.height,
        borderless = window.borderless,
        resizable = window.resizable,
        "starting window"
    );

    let mut registry = TopicRegistry::new();
    load_plugins(&config, &mut registry);

    let terminal = (!config.headless).then(|| Arc::new(TerminalRenderer::new(window.title())));
    let renderer: Arc<dyn SceneRenderer> = match &terminal {
        Some(terminal) => terminal.clone(),
        None => Arc::new(HeadlessRenderer::new()),
    };
    let store = Arc::new(ObjectStore::new(Arc::clone(&renderer)));

    // Nothing subscribes before the bus is up; failing here ends the process.
    let bus = connect_bus(&config.bus.addr()).await?;
    info!(addr = %config.bus.addr(), "connected to bus");

    let dispatching = dispatch(
        &registry,
        window.index,
        &bus,
        Arc::clone(&store),
        renderer.as_ref(),
        config.tick_period(),
    );
    match terminal {
        Some(terminal) => {
            tokio::select! {
                failed = dispatching => match failed? {},
                closed = terminal.run(store) => closed?,
            }
            info!("window closed");
        }
        None => match dispatching.await? {},
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["topicscene"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command.unwrap()
    }

    fn window_args(args: &[&str]) -> WindowArgs {
        let mut argv = vec!["window"];
        argv.extend_from_slice(args);
        match parse(&argv) {
            Commands::Window(args) => args,
            _ => panic!("expected the window subcommand"),
        }
    }

    #[test]
    fn flags_override_defaults() {
        let args = window_args(&[
            "--window-index",
            "2",
            "--port",
            "9000",
            "--plugin-dir",
            "a",
            "--plugin-dir",
            "b",
            "--plugin-exclude",
            "skip.toml",
            "--headless",
        ]);
        let config = args.resolve().unwrap();
        assert_eq!(config.window.index, 2);
        assert_eq!(config.bus.addr(), "localhost:9000");
        assert_eq!(config.plugins.directories, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(config.plugins.exclude, vec!["mod.toml".to_string(), "skip.toml".to_string()]);
        assert!(config.headless);
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"tick_ms = 10\n[bus]\nhost = \"bus.local\"\nport = 7000\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = window_args(&["--config", &path, "--port", "7001"]).resolve().unwrap();
        assert_eq!(config.bus.addr(), "bus.local:7001");
        assert_eq!(config.tick_ms, 10);
    }

    #[test]
    fn child_args_round_trip_without_index() {
        let original = window_args(&[
            "--window-width",
            "800",
            "--window-index",
            "3",
            "--plugin-dir",
            "plugins",
            "--window-borderless",
            "--tick-ms",
            "20",
        ]);

        let forwarded = original.to_args();
        assert!(!forwarded.iter().any(|a| a == "--window-index"));

        let argv: Vec<&str> = forwarded.iter().map(String::as_str).collect();
        let reparsed = window_args(&argv);
        assert_eq!(
            reparsed,
            WindowArgs {
                window_index: None,
                ..original
            }
        );
    }

    #[test]
    fn publish_needs_a_payload() {
        assert!(Cli::try_parse_from(["topicscene", "publish", "topic/a"]).is_err());
        assert!(matches!(
            parse(&["publish", "topic/a", "--data", "hi"]),
            Commands::Publish { data: Some(_), .. }
        ));
    }

    #[test]
    fn log_file_is_per_window() {
        assert_eq!(log_file_name(1), PathBuf::from("topicscene-window-1.log"));
    }
}
