//! PageScope CLI: extract the merged accessibility tree of a live page.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cdp_bridge::{BridgeConfig, ChromiumTransport, DebugTransport, SessionManager};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pagescope_core_types::{BackendNodeId, TargetId};
use perceiver_axtree::{
    to_json, to_text, FilterMode, MergeOptions, TreeFetcher, TreePerceiver,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serialized trees beyond this size are suppressed in favor of a notice;
/// the fetch/merge layers have no size awareness of their own.
const OUTPUT_CHAR_BUDGET: usize = 50_000;

#[derive(Parser)]
#[command(
    name = "pagescope",
    version,
    about = "Merged DOM/layout/accessibility tree extraction over the Chrome DevTools Protocol"
)]
struct Cli {
    /// Connect to an already-running browser instead of launching one.
    #[arg(long, global = true)]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, merge and print the element tree of a page.
    Dump(DumpArgs),
    /// List open page targets.
    Targets,
    /// Current bounding box of one structural node.
    Bounds(BoundsArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// Open a new page at this URL and dump it.
    #[arg(long, conflicts_with = "target")]
    url: Option<String>,

    /// Dump an existing target (see `pagescope targets`); defaults to the
    /// first open page.
    #[arg(long)]
    target: Option<String>,

    #[arg(long, default_value_t = 15)]
    depth: usize,

    #[arg(long, value_enum, default_value_t = FilterArg::All)]
    filter: FilterArg,

    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,

    /// Capture the extended computed-style set in the snapshot.
    #[arg(long)]
    extended_styles: bool,
}

#[derive(Args)]
struct BoundsArgs {
    /// Target to inspect; defaults to the first open page.
    #[arg(long)]
    target: Option<String>,

    /// Backend node id of the element.
    #[arg(long)]
    backend_id: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Interactive,
}

impl From<FilterArg> for FilterMode {
    fn from(value: FilterArg) -> Self {
        match value {
            FilterArg::All => FilterMode::All,
            FilterArg::Interactive => FilterMode::Interactive,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut cfg = BridgeConfig::default();
    if cli.ws_url.is_some() {
        cfg.websocket_url = cli.ws_url.clone();
    }
    let idle_release = Duration::from_millis(cfg.idle_release_ms);

    let transport = Arc::new(ChromiumTransport::new(cfg));
    transport.start().await.context("starting transport")?;

    let sessions = SessionManager::new(Arc::clone(&transport), idle_release);
    sessions.start();

    let result = match cli.command {
        Command::Dump(args) => dump(&transport, &sessions, args).await,
        Command::Targets => list_targets(&transport).await,
        Command::Bounds(args) => bounds(&transport, &sessions, args).await,
    };

    sessions.force_release_all().await;
    transport.shutdown().await;
    result
}

async fn dump(
    transport: &Arc<ChromiumTransport>,
    sessions: &Arc<SessionManager<ChromiumTransport>>,
    args: DumpArgs,
) -> Result<()> {
    let target = match (&args.url, &args.target) {
        (Some(url), _) => {
            let target = open_page(transport, url).await?;
            wait_for_load(transport, sessions, &target).await;
            target
        }
        (None, Some(id)) => TargetId(id.clone()),
        (None, None) => first_page_target(transport).await?,
    };

    let perceiver = TreePerceiver::new(Arc::clone(sessions), target);
    let options = MergeOptions {
        max_depth: args.depth,
        filter: args.filter.into(),
        reset_refs: true,
        extended_styles: args.extended_styles,
    };
    let forest = perceiver.read_tree(&options).await?;

    let rendered = match args.format {
        FormatArg::Text => to_text(&forest),
        FormatArg::Json => serde_json::to_string_pretty(&to_json(&forest))?,
    };

    if rendered.len() > OUTPUT_CHAR_BUDGET {
        println!(
            "Tree output is {} characters (budget {}). Re-run with a smaller \
             --depth or with --filter interactive.",
            rendered.len(),
            OUTPUT_CHAR_BUDGET
        );
        return Ok(());
    }

    print!("{rendered}");
    Ok(())
}

async fn list_targets(transport: &Arc<ChromiumTransport>) -> Result<()> {
    let result = transport
        .send_browser("Target.getTargets", json!({}))
        .await?;
    let targets = result["targetInfos"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    for info in targets.iter().filter(|t| t["type"] == "page") {
        println!(
            "{}  {}",
            info["targetId"].as_str().unwrap_or("?"),
            info["url"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

async fn bounds(
    transport: &Arc<ChromiumTransport>,
    sessions: &Arc<SessionManager<ChromiumTransport>>,
    args: BoundsArgs,
) -> Result<()> {
    let target = match args.target {
        Some(id) => TargetId(id),
        None => first_page_target(transport).await?,
    };
    let fetcher = TreeFetcher::new(Arc::clone(sessions));
    let bounds = fetcher
        .fetch_node_bounds(&target, BackendNodeId(args.backend_id))
        .await?;
    println!("{}", serde_json::to_string(&bounds)?);
    Ok(())
}

async fn first_page_target(transport: &Arc<ChromiumTransport>) -> Result<TargetId> {
    let result = transport
        .send_browser("Target.getTargets", json!({}))
        .await?;
    result["targetInfos"]
        .as_array()
        .and_then(|targets| {
            targets
                .iter()
                .find(|t| t["type"] == "page")
                .and_then(|t| t["targetId"].as_str())
        })
        .map(TargetId::from)
        .ok_or_else(|| anyhow!("no open page targets (open a tab or pass --url)"))
}

async fn open_page(transport: &Arc<ChromiumTransport>, url: &str) -> Result<TargetId> {
    let result = transport
        .send_browser("Target.createTarget", json!({ "url": url }))
        .await?;
    let target_id = result["targetId"]
        .as_str()
        .ok_or_else(|| anyhow!("Target.createTarget returned no targetId"))?;
    info!(target: "pagescope", url, target_id, "opened page");
    Ok(TargetId::from(target_id))
}

/// Wait until the page fires its load event (or 10s pass). The document may
/// already be complete by the time the listener is registered, so readyState
/// is checked first.
async fn wait_for_load(
    transport: &Arc<ChromiumTransport>,
    sessions: &Arc<SessionManager<ChromiumTransport>>,
    target: &TargetId,
) {
    let _ = sessions.send(target, "Page.enable", json!({})).await;

    if let Ok(result) = sessions
        .send(
            target,
            "Runtime.evaluate",
            json!({ "expression": "document.readyState", "returnByValue": true }),
        )
        .await
    {
        if result["result"]["value"] == "complete" {
            return;
        }
    }

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let listener = transport.on(target, "Page.loadEventFired", {
        let tx = Arc::clone(&tx);
        Arc::new(move |_params| {
            if let Ok(mut guard) = tx.lock() {
                if let Some(sender) = guard.take() {
                    let _ = sender.send(());
                }
            }
        })
    });

    let _ = tokio::time::timeout(Duration::from_secs(10), rx).await;
    transport.off(target, listener);
}
