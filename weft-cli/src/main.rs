//! Headless Weft canvas host.
//!
//! Loads host configuration, widget manifests and a persisted canvas, mounts
//! every sandboxed widget and runs until Ctrl-C, applying dock intents raised
//! by container widgets. The canvas is written back on exit.
//!
//! Usage:
//!   weft-host --manifests widgets --canvas-dir canvases --canvas home

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use weft_bus::{EventBus, Topic};
use weft_runtime::{
    FileCanvasStore, HostConfig, InMemoryStateStore, IntentOutcome, ManifestRegistry,
    ReconcileReport, RuntimeContext, RuntimeDeps,
};
use weft_types::{CanvasId, OriginId};
use weft_widget_host::{HostLoader, NativeGuestRegistry, WasmEngine, WasmGuestLoader};

#[derive(Parser, Debug)]
#[command(name = "weft-host")]
#[command(about = "Headless Weft canvas host")]
struct Args {
    /// Host configuration file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    /// Standalone widget policy file; replaces the `[policy]` table of the config
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Directory of widget manifests (*.json, *.toml)
    #[arg(short, long, default_value = "widgets")]
    manifests: PathBuf,

    /// Directory holding compiled widget modules; defaults to the manifest directory
    #[arg(long)]
    modules: Option<PathBuf>,

    /// Directory of persisted canvases
    #[arg(long, default_value = "canvases")]
    canvas_dir: PathBuf,

    /// Canvas id to load and save
    #[arg(long, default_value = "default")]
    canvas: String,

    /// Attribution for widget debug logs
    #[arg(long)]
    creator: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Weft host starting...");
    let config = HostConfig::load_from(&args.config);
    let bus = Arc::new(EventBus::with_origin(OriginId::generate(), config.bus.max_hops));
    info!("Bus origin: {}", bus.origin());

    let manifests = Arc::new(ManifestRegistry::new());
    let loaded = manifests
        .load_dir(&args.manifests)
        .with_context(|| format!("reading manifests from {}", args.manifests.display()))?;
    info!("Loaded {} widget manifest(s)", loaded);

    let engine = Arc::new(WasmEngine::new().context("creating wasm engine")?);
    let module_root = args.modules.clone().unwrap_or_else(|| args.manifests.clone());
    let loader = HostLoader::new(
        NativeGuestRegistry::new(),
        WasmGuestLoader::new(engine, Some(module_root)),
    );

    let store = FileCanvasStore::new(&args.canvas_dir);
    let mut ctx = RuntimeContext::new(
        CanvasId::from(args.canvas.as_str()),
        RuntimeDeps {
            bus: Arc::clone(&bus),
            state_store: Arc::new(InMemoryStateStore::new()),
            manifests,
            loader: Arc::new(loader),
            config,
        },
    );
    if let Some(creator) = args.creator {
        ctx = ctx.with_creator(creator);
    }
    if let Some(policy) = &args.policy {
        ctx = ctx.with_policy_file(policy);
    }

    if ctx.restore(&store).context("loading canvas")? {
        info!("Canvas '{}' restored", args.canvas);
    } else {
        info!("Canvas '{}' not found, starting empty", args.canvas);
    }

    let traffic = bus.on(Topic::All, |event| {
        debug!(
            kind = %event.kind,
            source = ?event.source_widget_id,
            target = ?event.target_widget_id,
            "Bus event"
        );
        Ok(())
    });

    log_report(&ctx.reconcile().await);

    let (intent_subscription, mut intents) = ctx.subscribe_intents();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            Some((container, intent)) = intents.recv() => {
                match ctx.apply_intent(&container, &intent) {
                    Ok(IntentOutcome::Preset(descriptor)) => {
                        info!(container = %container, child = %descriptor.id, "Preset requested");
                    }
                    Ok(outcome) => {
                        debug!(container = %container, ?outcome, "Intent applied");
                        log_report(&ctx.reconcile().await);
                    }
                    Err(e) => warn!(container = %container, action = intent.action(), "Intent rejected: {}", e),
                }
            }
        }
    }

    intent_subscription.unsubscribe();
    traffic.unsubscribe();
    ctx.persist(&store).context("saving canvas")?;
    ctx.shutdown();
    info!("Canvas '{}' saved", args.canvas);
    Ok(())
}

fn log_report(report: &ReconcileReport) {
    if report.is_noop() {
        return;
    }
    info!(
        "Reconciled: {} mounted, {} destroyed, {} native",
        report.mounted.len(),
        report.destroyed.len(),
        report.native.len()
    );
    for (widget_id, reason) in &report.failed {
        warn!(widget_id = %widget_id, "Widget not mounted: {}", reason);
    }
}
