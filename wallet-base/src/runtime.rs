use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::config::{Settings, config};
use crate::{Error, Result};

/// Returns the runtime shared by every synchronous entry point of the SDK, building it from
/// [`config()`] on first use.
///
/// Hosts call into the SDK from their own threads, so synchronous exports drive async work with
/// `shared().block_on(..)`. Calling `block_on` from inside an async context panics, which the
/// [`crate::recover`] guards turn into an error.
pub fn shared() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| match build(config()) {
        Ok(runtime) => runtime,
        Err(e) => {
            panic!("Failed to build shared runtime: {:?}", e);
        }
    })
}

fn build(settings: &Settings) -> Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all().thread_name("wallet-base-worker");
    if let Some(threads) = settings.worker_threads {
        builder.worker_threads(threads);
    }

    let runtime = builder
        .build()
        .map_err(|e| Error::Runtime(format!("building multi-thread runtime: {e}")))?;
    info!(worker_threads = ?settings.worker_threads, "Shared runtime started");
    Ok(runtime)
}
