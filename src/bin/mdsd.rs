//! Metadata server daemon entry point: parses flags, loads config, wires up
//! the storage and cache stack, and runs a fixed-size worker pool that
//! drains dirty directories from the inode cache until told to stop.

use clap::Parser;
use mds::config::CliArgs;
use mds::error::Result;
use mds::MetadataServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Drains every dirty or trashed entry the inode cache is holding onto the
/// backing store, one partition-routed write per entry.
///
/// The engine for each directory is built from the subtree root that
/// directory was cached under, not from the directory's own inode number —
/// in partition mode those are only the same thing for a partition's root
/// directory itself.
fn write_back_pass(server: &MetadataServer) -> Result<usize> {
    let mut flushed = 0;
    for (parent, (dirty, trashed)) in server.inode_cache.get_dirty_map() {
        let Some(entry) = server.inode_cache.entry(parent) else {
            continue;
        };
        let subtree_root = server.inode_cache.subtree_root_of(parent).unwrap_or(parent);
        let engine = server.engine_for(subtree_root);
        for inode in dirty {
            if let Some(e) = entry.get(inode).into_option() {
                if engine.write(parent, &e).is_ok() {
                    let chunk_ids = entry.mark_written_back(inode);
                    debug!(inode, ?chunk_ids, "write-back update cleared pinned journal chunks");
                    flushed += 1;
                }
            }
        }
        for inode in trashed {
            match entry.handle_write_back_delete(inode) {
                mds::cache::parent_entry::WriteBackCode::DeleteAfter => {
                    let result = engine.delete_by_inode_in(parent, inode);
                    let already_gone = matches!(&result, Err(e) if e.kind() == mds::error::ErrorKind::NotFound);
                    if result.is_ok() || already_gone {
                        let chunk_ids = entry.mark_deleted_back(inode);
                        debug!(inode, ?chunk_ids, "write-back delete cleared pinned journal chunks");
                        flushed += 1;
                    }
                }
                mds::cache::parent_entry::WriteBackCode::Discarded => {
                    let chunk_ids = entry.mark_deleted_back(inode);
                    debug!(inode, ?chunk_ids, "discarded a never-persisted record, clearing its chunks");
                    flushed += 1;
                }
                _ => {}
            }
        }
    }
    Ok(flushed)
}

fn run(server: Arc<MetadataServer>, shutdown: Arc<AtomicBool>) {
    let interval = Duration::from_millis(250);
    while !shutdown.load(Ordering::Relaxed) {
        match write_back_pass(&server) {
            Ok(0) => {}
            Ok(n) => info!(flushed = n, "write-back pass drained entries"),
            Err(e) => warn!(error = %e, "write-back pass failed"),
        }
        std::thread::sleep(interval);
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = CliArgs::parse();
    let config = args.resolve()?;
    info!(host = %config.host_identifier, rank = config.host_rank, "starting metadata server");

    let server = Arc::new(MetadataServer::bootstrap(config)?);
    let worker_threads = server.config.worker_threads.max(1);
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(worker_threads);
    for id in 0..worker_threads {
        let server = server.clone();
        let shutdown = shutdown.clone();
        handles.push(
            std::thread::Builder::new()
                .name(format!("mds-writeback-{id}"))
                .spawn(move || run(server, shutdown))
                .expect("failed to spawn worker thread"),
        );
    }

    ctrlc_shutdown(shutdown.clone());

    for handle in handles {
        if handle.join().is_err() {
            error!("write-back worker thread panicked");
        }
    }
    Ok(())
}

/// Best-effort SIGINT handling via `libc`: flips the shutdown flag so
/// workers exit their loop on the next tick instead of being killed
/// mid-write.
fn ctrlc_shutdown(shutdown: Arc<AtomicBool>) {
    static FLAG: AtomicBool = AtomicBool::new(false);
    extern "C" fn handler(_signum: libc::c_int) {
        FLAG.store(true, Ordering::SeqCst);
    }
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
    std::thread::spawn(move || loop {
        if FLAG.load(Ordering::SeqCst) {
            shutdown.store(true, Ordering::SeqCst);
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    });
}
