//! Deferred deallocation for data shared with the audio thread.
//!
//! Module nodes and chain snapshots are `basedrop::Shared` pointers. When the
//! audio thread drops the last reference it only enqueues the pointer; the
//! memory is released by a background collector thread.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

// How often the collector thread frees queued allocations.
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("spectral-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread.
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            log::debug!("module collector thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            // No background thread: keep a collector that is never drained.
            // Queued nodes then leak instead of being freed on the audio thread.
            log::warn!("failed to start module collector thread");
            let collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for allocating `Shared` values that are freed off the audio thread.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
