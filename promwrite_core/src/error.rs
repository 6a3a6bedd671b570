use std::sync::atomic::{AtomicBool, Ordering};

/// Whether to log the full cause chain of errors.
/// Use the `DEBUG` env var (or `--debug`) to enable.
static ERROR_CHAIN: AtomicBool = AtomicBool::new(false);

pub fn debug_error_enabled(enabled: bool) {
    ERROR_CHAIN.store(enabled, Ordering::Relaxed);
}

/// Log an error which is being swallowed
pub fn debug_error(err: anyhow::Error) {
    if ERROR_CHAIN.load(Ordering::Relaxed) {
        log::warn!("{}", err);
        for err in err.chain().skip(1) {
            log::warn!("Caused by: {}", err);
        }
    } else {
        log::warn!("{:#}", err);
    }
}
