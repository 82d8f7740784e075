//! Command-line interface over the local commitment-memory API
//! (`spec.md` §6). One subcommand per `Store` operation; output is JSON
//! on stdout so the CLI composes with `jq` the way the teacher's own
//! tooling expects.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commit_memory::{CommitRequest, CommitmentType, Payload, Proof, QueryFilter, Store};
use serde_json::json;

#[derive(Parser)]
#[command(name = "commit-memory")]
#[command(about = "Verifiable commitment-memory core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding the identity key and the SQLite database.
    #[arg(long, global = true, env = "COMMIT_MEMORY_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store: load or create the identity key and database.
    Init,

    /// Sign and append a new commitment.
    Commit {
        /// Commitment type: agreement, attestation, state, or custom.
        #[arg(short, long, default_value = "agreement")]
        r#type: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        counterparty: Option<String>,
        /// Arbitrary JSON metadata.
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Fetch a single commitment by id.
    Get {
        id: String,
    },

    /// List commitments, optionally filtered.
    List {
        #[arg(short, long)]
        r#type: Option<String>,
        #[arg(long)]
        subject_contains: Option<String>,
        #[arg(long)]
        counterparty: Option<String>,
        #[arg(long, default_value = "100")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Show the store's public key and unanchored commitment count.
    Status,

    /// List recorded anchors.
    Anchors,

    /// Assemble and broadcast an anchor payload via the configured wallet.
    Wallet {
        #[arg(long)]
        dry_run: bool,
        /// Sats/byte to fund the broadcast transaction at.
        #[arg(long)]
        fee_rate: Option<f64>,
    },

    /// Record an anchor that was broadcast out of band.
    Record {
        txid: String,
        #[arg(long)]
        timestamp: Option<u64>,
    },

    /// Refresh an anchor's confirmation height from the block explorer.
    Refresh {
        txid: String,
    },

    /// Build an inclusion proof for a commitment.
    Prove {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Verify a proof file against the store's (or a given) public key.
    Verify {
        proof_file: PathBuf,
        #[arg(long)]
        public_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    if let Ok(config) = commit_memory::config::Config::from_env() {
        let _ = commit_memory::logging::init_from_config(&config);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), commit_memory::CoreError> {
    let store = Store::open(&cli.data_dir)?;

    match cli.command {
        Commands::Init => {
            println!("{}", json!({ "publicKey": store.public_key() }));
        }

        Commands::Commit {
            r#type,
            subject,
            content,
            counterparty,
            metadata,
        } => {
            let kind: CommitmentType = type_from_str(&r#type)?;
            let mut payload = Payload::new(subject, content);
            if let Some(counterparty) = counterparty {
                payload = payload.with_counterparty(counterparty);
            }
            if let Some(metadata) = metadata {
                let value: serde_json::Value = serde_json::from_str(&metadata)
                    .map_err(|e| commit_memory::CoreError::internal(format!("invalid --metadata JSON: {e}")))?;
                let metadata = commit_memory::canon::CanonValue::from_json(&value)
                    .map_err(|e| commit_memory::CoreError::internal(format!("invalid --metadata JSON: {e}")))?;
                payload = payload.with_metadata(metadata);
            }

            let commitment = store.commit(CommitRequest { kind, payload }).await?;
            println!("{}", serde_json::to_string_pretty(&commit_memory::CommitmentView::from(&commitment)).unwrap());
        }

        Commands::Get { id } => match store.get(&id).await? {
            Some(commitment) => {
                println!("{}", serde_json::to_string_pretty(&commit_memory::CommitmentView::from(&commitment)).unwrap());
            }
            None => return Err(commit_memory::CoreError::internal(format!("no commitment with id {id}"))),
        },

        Commands::List {
            r#type,
            subject_contains,
            counterparty,
            limit,
            offset,
        } => {
            let mut filter = QueryFilter::new();
            if let Some(t) = r#type {
                filter.kind = Some(type_from_str(&t)?);
            }
            filter.subject_contains = subject_contains;
            filter.counterparty = counterparty;
            filter.limit = limit.min(QueryFilter::MAX_LIMIT);
            filter.offset = offset;

            let commitments = store.query(&filter).await?;
            let views: Vec<_> = commitments.iter().map(commit_memory::CommitmentView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views).unwrap());
        }

        Commands::Status => {
            let unanchored = store.unanchored_count().await?;
            let total = store.count().await?;
            let latest = store.latest_anchor().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "publicKey": store.public_key(),
                    "totalCommitments": total,
                    "unanchoredCommitments": unanchored,
                    "latestAnchor": latest,
                }))
                .unwrap()
            );
        }

        Commands::Anchors => {
            let anchors = store.list_anchors().await?;
            println!("{}", serde_json::to_string_pretty(&anchors).unwrap());
        }

        Commands::Wallet { dry_run, fee_rate } => {
            let anchor = store.anchor(commit_memory::AnchorOptions { dry_run, fee_rate }).await?;
            println!("{}", serde_json::to_string_pretty(&anchor).unwrap());
        }

        Commands::Record { txid, timestamp } => {
            let anchor = store.record_anchor(txid, timestamp).await?;
            println!("{}", serde_json::to_string_pretty(&anchor).unwrap());
        }

        Commands::Refresh { txid } => match store.refresh_anchor(&txid).await? {
            Some(anchor) => println!("{}", serde_json::to_string_pretty(&anchor).unwrap()),
            None => return Err(commit_memory::CoreError::internal(format!("no anchor with txid {txid}"))),
        },

        Commands::Prove { id, out } => match store.prove(&id).await? {
            Some(proof) => {
                let rendered = serde_json::to_string_pretty(&proof).unwrap();
                match out {
                    Some(path) => std::fs::write(&path, &rendered)
                        .map_err(|e| commit_memory::CoreError::internal(format!("writing {}: {e}", path.display())))?,
                    None => println!("{rendered}"),
                }
            }
            None => {
                return Err(commit_memory::CoreError::internal(format!(
                    "commitment {id} does not exist or is not yet anchored"
                )))
            }
        },

        Commands::Verify { proof_file, public_key } => {
            let contents = std::fs::read_to_string(&proof_file)
                .map_err(|e| commit_memory::CoreError::internal(format!("reading {}: {e}", proof_file.display())))?;
            let proof: Proof = serde_json::from_str(&contents)
                .map_err(|e| commit_memory::CoreError::internal(format!("parsing proof file: {e}")))?;

            let verified = store.verify(&proof, public_key.as_deref());
            println!("{}", json!({ "verified": verified }));
            if !verified {
                return Err(commit_memory::CoreError::internal("proof failed verification"));
            }
        }
    }

    Ok(())
}

fn type_from_str(s: &str) -> Result<CommitmentType, commit_memory::CoreError> {
    s.parse().map_err(commit_memory::CoreError::internal)
}
