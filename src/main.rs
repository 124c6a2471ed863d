//! Thin CLI entry point wiring a concrete libpq transport, the wire codec,
//! and the apply engine together. Connection/credential handling and real
//! local storage are both external collaborators this crate doesn't ship
//! (see SPEC_FULL.md §1); this binary demonstrates the wiring with the
//! in-memory reference host, the same way the teacher's `main.rs` wraps a
//! synchronous libpq loop in `spawn_blocking` and wires its event sink by
//! configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use logirep::apply::{ApplyEngine, LastWriterWinsResolver, MemoryHost};
use logirep::config::ReplicationConfig;
use logirep::message::decode_outer;
use logirep::origin::MemoryProgressStore;
use logirep::transport::PgConnection;
use logirep::wire::BufferReader;

#[derive(Parser, Debug)]
#[command(
    name = "logirep",
    about = "Logical replication apply engine",
    version
)]
struct Args {
    /// Origin id for the session applying changes (0 = default local session origin).
    #[arg(long, default_value_t = 0)]
    session_origin_id: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    logirep::logging::init();
    let args = Args::parse();

    let config = ReplicationConfig::from_env()?;
    info!(slot = %config.slot_name, publication = %config.publication_name, "starting apply session");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received interrupt, finishing current frame before shutdown");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let host = Arc::new(MemoryHost::new());
    warn!("using the in-memory reference host; applied rows are not persisted");
    let progress = Arc::new(MemoryProgressStore::new());
    let mut engine = ApplyEngine::new(
        host,
        progress,
        Box::new(LastWriterWinsResolver),
        args.session_origin_id,
        shutdown.clone(),
    )
    .with_database_encoding(config.database_encoding.clone());

    let conn = PgConnection::connect(&config.connection_string)?;
    let command = format!(
        "START_REPLICATION SLOT {} LOGICAL 0/0 (proto_version '1', publication_names '{}')",
        config.slot_name, config.publication_name
    );
    conn.start_replication(&command)?;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            engine.abandon_in_progress().await?;
            info!(stats = %engine.stats, "shutting down, abandoned any in-progress transaction");
            break;
        }

        match logirep::transport::CopyDataTransport::recv(&conn).await {
            Ok(Some(bytes)) => {
                let mut reader = BufferReader::new(&bytes);
                match decode_outer(&mut reader) {
                    Ok(Some(frame)) => {
                        if let Err(err) = engine.handle_frame(frame).await {
                            error!(%err, "apply failed, terminating session");
                            return Err(err.into());
                        }
                    }
                    Ok(None) => {} // unrecognized outer tag, skip
                    Err(err) => {
                        error!(%err, "malformed outer frame");
                        return Err(err.into());
                    }
                }
            }
            Ok(None) => continue,
            Err(err) => {
                error!(%err, "transport closed");
                return Err(err.into());
            }
        }
    }

    Ok(())
}
