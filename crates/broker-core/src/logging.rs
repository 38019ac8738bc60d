//! Runtime log-level plumbing shared by the binary and admin tooling.

use std::sync::atomic::{AtomicI32, Ordering};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, reload};

static RELOAD: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();
static CURRENT_IDX: AtomicI32 = AtomicI32::new(2); // 0=error,1=warn,2=info,3=debug,4=trace

const LEVELS: [LevelFilter; 5] = [
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

pub fn set_reload_handle(handle: reload::Handle<EnvFilter, Registry>, initial: LevelFilter) {
    let _ = RELOAD.set(handle);
    CURRENT_IDX.store(level_to_idx(initial), Ordering::Relaxed);
}

/// Apply a new level at runtime. A no-op until the reload handle is
/// registered.
pub fn set_level(level: LevelFilter) -> Option<LevelFilter> {
    let handle = RELOAD.get()?;
    CURRENT_IDX.store(level_to_idx(level), Ordering::Relaxed);
    let _ = handle.reload(EnvFilter::new(level_to_str(level)));
    Some(level)
}

pub fn current_level() -> LevelFilter {
    LEVELS[CURRENT_IDX.load(Ordering::Relaxed).clamp(0, 4) as usize]
}

fn level_to_idx(level: LevelFilter) -> i32 {
    match level {
        LevelFilter::ERROR => 0,
        LevelFilter::WARN => 1,
        LevelFilter::INFO => 2,
        LevelFilter::DEBUG => 3,
        LevelFilter::TRACE => 4,
        _ => 2,
    }
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::INFO => "info",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    }
}
