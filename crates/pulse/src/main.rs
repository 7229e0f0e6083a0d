use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;

use pulse::api::{self, AppState};
use pulse::config::{
    APP_NAME, AppConfig, default_config_dir, expand_path, load_config, write_default_config,
};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let config_file = resolve_config_file(cli.global.config.clone())?;
    let config = load_or_create_config(&config_file, cli.global.dry_run)?;
    let ctx = RuntimeContext {
        opts: cli.global,
        config_file,
        config,
    };
    ctx.init_logging();
    debug!("using config file {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => run_server(ctx, cmd),
        Command::Init { force } => handle_init(&ctx, force),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pulse - live agent telemetry feed over Server-Sent Events.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalOpts {
    /// Config file or directory to use
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// More logging; repeat for trace
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// JSON logs and JSON `config show`
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// YAML `config show`
    #[arg(long, global = true)]
    yaml: bool,
    /// Report what would change without touching disk or the network
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the event stream server
    Serve(ServeCommand),
    /// Write the default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (defaults to server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (defaults to server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

struct RuntimeContext {
    opts: GlobalOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    /// HTTP-layer spans go through `tracing`; the hub and store use the `log`
    /// facade, which env_logger picks up.
    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.log_level();
        if level == LevelFilter::Off {
            log::set_max_level(level);
            return;
        }

        let directive = level.to_string().to_lowercase();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("pulse={directive},tower_http={directive}")));
        let fmt_layer = tracing_subscriber::fmt::layer().with_ansi(use_color());

        if self.opts.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer.json())
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
                .ok();
        }

        env_logger::Builder::from_env(env_logger::Env::default())
            .filter_level(level)
            .try_init()
            .ok();
    }

    fn log_level(&self) -> LevelFilter {
        if self.opts.quiet {
            return LevelFilter::Error;
        }
        match self.opts.verbose {
            0 => self.config.logging.level.parse().unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn use_color() -> bool {
    env::var_os("NO_COLOR").is_none()
        && (env::var_os("FORCE_COLOR").is_some() || io::stderr().is_terminal())
}

fn resolve_config_file(override_path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if path.parent().is_none() {
        return Err(anyhow!("invalid config file path: {path:?}"));
    }
    Ok(path)
}

/// First run writes the defaults so there is always a file to edit.
fn load_or_create_config(path: &Path, dry_run: bool) -> Result<AppConfig> {
    if !path.exists() {
        if dry_run {
            return Ok(AppConfig::default());
        }
        write_default_config(path)?;
    }
    load_config(path)
}

fn handle_init(ctx: &RuntimeContext, force: bool) -> Result<()> {
    let path = &ctx.config_file;
    if path.exists() && !force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        ));
    }
    if ctx.opts.dry_run {
        info!("dry-run: would write default config to {}", path.display());
        return Ok(());
    }
    write_default_config(path)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered = if ctx.opts.json {
                serde_json::to_string_pretty(&ctx.config).context("serializing config to JSON")?
            } else if ctx.opts.yaml {
                serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
            } else {
                toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
            };
            println!("{rendered}");
        }
        ConfigCommand::Path => println!("{}", ctx.config_file.display()),
        ConfigCommand::Reset if ctx.opts.dry_run => {
            info!("dry-run: would reset {}", ctx.config_file.display());
        }
        ConfigCommand::Reset => write_default_config(&ctx.config_file)?,
    }
    Ok(())
}

#[tokio::main]
async fn run_server(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut config = ctx.config;
    if let Some(host) = cmd.host {
        config.server.host = host;
    }
    if let Some(port) = cmd.port {
        config.server.port = port;
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid address")?;
    if ctx.opts.dry_run {
        info!("dry-run: would listen on http://{}", addr);
        return Ok(());
    }

    info!(
        "Hub: heartbeat {}ms, push timeout {}ms, {} frames queued per client",
        config.hub.heartbeat_interval_ms, config.hub.push_timeout_ms, config.hub.sink_capacity
    );
    info!(
        "Store: in memory, last {} events, {} sessions",
        config.store.max_events, config.store.max_sessions
    );

    let state = AppState::from_config(config);
    state.hub.start_heartbeat();
    let hub = state.hub.clone();
    let app = api::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open SSE bodies never finish on their own.
            let closed = hub.close_all();
            info!("Shutting down, closed {} event stream(s)", closed);
        })
        .await
        .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A signal that cannot be watched never
/// fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
