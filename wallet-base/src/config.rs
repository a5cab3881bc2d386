use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;

use crate::{Error, Result};

const ENV_MAP_CONCURRENCY: &str = "WALLET_BASE_MAP_CONCURRENCY";
const ENV_WORKER_THREADS: &str = "WALLET_BASE_WORKER_THREADS";
const ENV_DEBUG: &str = "WALLET_BASE_DEBUG";

/// Concurrency used by [`crate::map_strings_concurrent`] when nothing is configured.
const DEFAULT_MAP_CONCURRENCY: usize = 10;

/// Returns the process-wide settings, loading them from the environment on first use.
pub fn config() -> &'static Settings {
    static CONF: OnceLock<Settings> = OnceLock::new();
    CONF.get_or_init(|| match Settings::load() {
        Ok(v) => v,
        Err(e) => {
            panic!("Failed to load configuration: {:?}", e);
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Default concurrency for batch helpers. `0` means unbounded.
    pub map_concurrency: usize,
    /// Worker threads of the shared runtime, `None` lets tokio pick one per core.
    pub worker_threads: Option<usize>,
    /// Human readable logs at debug level instead of JSON at info.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            map_concurrency: DEFAULT_MAP_CONCURRENCY,
            worker_threads: None,
            debug: false,
        }
    }
}

impl Settings {
    fn load() -> Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        vars.try_into()
    }
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(vars: HashMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(concurrency) = vars.get(ENV_MAP_CONCURRENCY) {
            settings.map_concurrency = concurrency.trim().parse().map_err(|e| {
                Error::Config(format!(
                    "parsing {ENV_MAP_CONCURRENCY}: expected usize, got {concurrency:?}: {e}"
                ))
            })?;
        }

        if let Some(threads) = vars.get(ENV_WORKER_THREADS) {
            let threads: usize = threads.trim().parse().map_err(|e| {
                Error::Config(format!(
                    "parsing {ENV_WORKER_THREADS}: expected usize, got {threads:?}: {e}"
                ))
            })?;
            if threads == 0 {
                return Err(Error::Config(format!(
                    "{ENV_WORKER_THREADS} must be greater than 0"
                )));
            }
            settings.worker_threads = Some(threads);
        }

        settings.debug = vars
            .get(ENV_DEBUG)
            .is_some_and(|v| v.to_lowercase() == "true");

        Ok(settings)
    }
}
