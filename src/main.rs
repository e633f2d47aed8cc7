//! Glass CLI entry point.
//!
//! Runs the invocation host either as an HTTP server or as a one-shot demo
//! that exercises the built-in guest primitives and exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glass_common::{ConfigFile, RuntimeConfig, RuntimeError, StoreBackend};
use glass_core::{CompiledArtifact, ModuleLoader, StateStore, WasmEngine, build_state_store};
use glass_host::guest::GUEST_WAT;
use glass_server::{GlassServer, ServerConfig};

/// Globally-enabled feature flag seeded at startup so a fresh node has
/// something observable.
const SEED_FLAG_KEY: &str = "flag:global:1";

#[derive(Debug, Parser)]
#[command(name = "glass", about = "Sandboxed WebAssembly invocation host")]
struct Args {
    /// Run mode.
    #[arg(long, value_enum, default_value_t = Mode::Server)]
    mode: Mode,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address for the HTTP server (overrides the config file).
    #[arg(long, env = "BIND_ADDR")]
    bind_addr: Option<String>,

    /// Node identity string for diagnostics.
    #[arg(long)]
    node_id: Option<String>,

    /// Redis address; selects the Redis state store backend.
    #[arg(long)]
    redis_addr: Option<String>,

    /// Path to a guest `.wasm` module; the built-in guest is used when
    /// absent.
    #[arg(long)]
    module: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Serve invocations over HTTP until shutdown.
    Server,
    /// Exercise the built-in guest primitives once and exit.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,glass=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting glass invocation host");

    let config_file = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut runtime_config = config_file.runtime.clone();
    if let Some(addr) = &args.redis_addr {
        runtime_config.store.backend = StoreBackend::Redis;
        runtime_config.store.redis_addr = addr.clone();
    }

    let node_id = args
        .node_id
        .or(config_file.node_id.clone())
        .unwrap_or_else(|| format!("glass-{}", uuid_suffix()));

    // An unreachable Redis backend fails startup here, before any traffic
    let store = build_state_store(&runtime_config.store)
        .await
        .context("initializing state store")?;

    seed_initial_state(&store).await?;

    let module_path = args.module.or(config_file.module_path.clone().map(PathBuf::from));

    match args.mode {
        Mode::Server => {
            run_server(&args.bind_addr, &config_file, &runtime_config, store, &node_id, module_path)
                .await
        }
        Mode::Demo => run_demo(&runtime_config, store, module_path).await,
    }
}

/// Seed the globally-enabled demo flag, leaving any operator-set value alone.
async fn seed_initial_state(store: &Arc<dyn StateStore>) -> anyhow::Result<()> {
    if !store.exists(SEED_FLAG_KEY).await? {
        store.set(SEED_FLAG_KEY, 1).await?;
        info!(key = SEED_FLAG_KEY, "Seeded global feature flag");
    }
    Ok(())
}

async fn run_server(
    bind_override: &Option<String>,
    config_file: &ConfigFile,
    runtime_config: &RuntimeConfig,
    store: Arc<dyn StateStore>,
    node_id: &str,
    module_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bind_addr = bind_override
        .clone()
        .unwrap_or_else(|| config_file.server.bind_addr.clone())
        .parse()
        .context("invalid bind address, expected 'host:port'")?;

    let server_config = ServerConfig::default()
        .with_bind_addr(bind_addr)
        .with_timeout(config_file.server.request_timeout_secs);

    let server = GlassServer::new(runtime_config, server_config, store, node_id)?;

    // Compile the guest exactly once, before accepting traffic
    match &module_path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading guest module {}", path.display()))?;
            server.state().load_guest(&bytes).await?;
            info!(path = %path.display(), "Guest module compiled");
        }
        None => {
            server.state().load_guest_wat(GUEST_WAT).await?;
            info!("Built-in guest program compiled");
        }
    }

    // Epoch ticker drives per-invocation deadlines (1 tick = 1ms)
    let _ticker = server
        .state()
        .engine()
        .spawn_epoch_ticker(Duration::from_millis(1));

    info!(node_id = %node_id, "Server initialized. Available endpoints:");
    info!("  ANY /invoke/:function?args=1,2  - Invoke a guest export");
    info!("  GET /health                     - Health check");
    info!("  GET /metrics                    - Node diagnostics");

    server.run().await?;
    Ok(())
}

/// Run every built-in primitive once against the configured store, logging
/// the results, then exit.
async fn run_demo(
    runtime_config: &RuntimeConfig,
    store: Arc<dyn StateStore>,
    module_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let engine = WasmEngine::new(&runtime_config.engine)?;
    let _ticker = engine.spawn_epoch_ticker(Duration::from_millis(1));

    let invoker = Arc::new(glass_host::create_invoker(
        &engine,
        runtime_config.execution.clone(),
        store.clone(),
    )?);

    let loader = ModuleLoader::new();
    let artifact: Arc<CompiledArtifact> = match &module_path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading guest module {}", path.display()))?;
            loader.get_or_load(engine.inner(), &bytes).await?
        }
        None => loader.get_or_load_wat(engine.inner(), GUEST_WAT).await?,
    };

    info!(hash = %artifact.content_hash(), "Guest compiled, running demo");

    let sum = invoker.invoke(&artifact, "add", &[3, 4], None).await?;
    info!(results = ?sum, "add(3, 4)");

    // Five concurrent clients each burn through a 2-per-minute budget;
    // overlapping check-then-act sequences can overshoot the limit
    let mut clients = Vec::new();
    for client in 1..=5u64 {
        let invoker = invoker.clone();
        let artifact = artifact.clone();
        clients.push(tokio::spawn(async move {
            for attempt in 1..=3 {
                let instance_id = format!("client-{client}");
                let remaining = invoker
                    .invoke(&artifact, "rate_limit", &[client, 2, 60], Some(instance_id))
                    .await?;
                info!(
                    client = client,
                    attempt = attempt,
                    remaining = remaining[0],
                    "rate_limit(client, 2, 60)"
                );
            }
            Ok::<(), RuntimeError>(())
        }));
    }
    for client in clients {
        client.await??;
    }

    let session = invoker
        .invoke(&artifact, "create_session", &[12345], None)
        .await?;
    let owner = invoker
        .invoke(&artifact, "validate_session", &[session[0]], None)
        .await?;
    info!(session_id = session[0], user_id = owner[0], "Session round trip");

    let flag = invoker
        .invoke(&artifact, "check_feature_flag", &[12345, 1], None)
        .await?;
    info!(enabled = flag[0], "check_feature_flag(12345, 1)");

    info!("Demo complete");
    Ok(())
}

fn uuid_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
