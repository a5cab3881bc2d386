use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

use crate::config::config;
use crate::recover::normalize_in_hook;

/// Panic hook that sends panic info to `tracing` instead of stderr, one line per panic. The
/// payload is described the way the export guards describe it to host callers, so a log line
/// can be matched with the error the host received. Foreign error payloads are only named here,
/// since their `Display` could panic inside the hook.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    let backtrace = Backtrace::capture();
    let backtrace_captured = backtrace.status() == BacktraceStatus::Captured;
    let payload = normalize_in_hook(panic_info.payload());

    match (panic_info.location(), backtrace_captured) {
        (Some(location), false) => {
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload,
            );
        }
        (Some(location), true) => {
            tracing::error!(
                "{}:{}:{}: {}\n{}",
                location.file(),
                location.line(),
                location.column(),
                payload,
                backtrace,
            );
        }
        (None, _) => {
            tracing::error!("{}\n{}", payload, backtrace);
        }
    };
}

/// Installs the global subscriber and the panic hook. `RUST_LOG` overrides the default level,
/// which is `info`, or `debug` with plain text output when `WALLET_BASE_DEBUG=true`.
///
/// Hosts may call this from every binding entry point; only the first call has any effect, and
/// an already installed subscriber is left in place.
pub fn register() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        let debug_mode = config().debug;
        let default_log_level = if debug_mode { "debug" } else { "info" };

        let filter = EnvFilter::builder()
            .with_default_directive(default_log_level.parse().unwrap_or(Level::INFO.into()))
            .from_env_lossy();

        let layer = if debug_mode {
            fmt::layer().boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .json()
                .flatten_event(true)
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .is_ok()
        {
            std::panic::set_hook(Box::new(report_panic));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover::guard;

    #[test]
    fn register_is_idempotent_and_keeps_guards_working() {
        register();
        register();

        let err = guard(|| -> Result<(), crate::BasicError> { panic!("after register") })
            .unwrap_err();
        assert_eq!(err.message(), "panic error: after register");
    }
}
