//! NDJSON Sync Follower
//!
//! Creates a document with a few random commits and syncs it against a
//! sync server until the chosen termination policy is met.

use automerge::transaction::Transactable;
use automerge::{AutoCommit, ROOT};
use clap::{Parser, ValueEnum};
use ndjson_sync::sync::{has_all_remote_heads, heads_equal, HeadsDisplay};
use ndjson_sync::{ClientOptions, SharedDoc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ndjson-sync-follower")]
#[command(about = "Sync a document with an ndjson sync server", long_about = None)]
struct Cli {
    /// Base url of the sync server
    #[arg(default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Document id on the server
    #[arg(long, default_value = "example")]
    doc_id: String,

    /// Number of random commits to create before syncing
    #[arg(long, default_value_t = 10)]
    commits: usize,

    /// When to stop syncing
    #[arg(long, value_enum, default_value_t = Until::HeadsEqual)]
    until: Until,
}

#[derive(Clone, Copy, ValueEnum)]
enum Until {
    /// Both sides have the same heads
    HeadsEqual,
    /// We have every change the server has
    RemoteHeads,
    /// Keep following until interrupted
    Never,
}

fn random_doc(commits: usize) -> Result<AutoCommit, automerge::AutomergeError> {
    let mut doc = AutoCommit::new();
    for _ in 0..commits {
        doc.put(ROOT, "foo", rand::random::<u64>().to_string())?;
        doc.commit();
    }
    Ok(doc)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ndjson_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let doc = match random_doc(cli.commits) {
        Ok(doc) => SharedDoc::new(doc),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let options = match cli.until {
        Until::HeadsEqual => ClientOptions::new().with_termination_check(heads_equal),
        Until::RemoteHeads => ClientOptions::new().with_termination_check(has_all_remote_heads),
        Until::Never => ClientOptions::new(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let url = format!("{}/{}", cli.url.trim_end_matches('/'), cli.doc_id);
    if let Err(e) = doc.http_push_pull_changes(&url, options, &cancel).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing::info!(heads = %HeadsDisplay(&doc.heads()), "sync finished");
}
