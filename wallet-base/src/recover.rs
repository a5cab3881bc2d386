//! Every function exported to a host language is wrapped in one of the guards below:
//!
//! ```ignore
//! pub fn derive_addresses(seed: &str, count: usize) -> Result<Vec<String>, BasicError> {
//!     guard(|| chain::derive(seed, count))
//! }
//! ```
//!
//! A panic inside the body is recovered and classified by its payload:
//!
//! | payload                                         | message                           |
//! |-------------------------------------------------|-----------------------------------|
//! | [`BasicError`], [`crate::Error`]                | the error's own message           |
//! | `Box<dyn Error + Send (+ Sync)>`, `io::Error`   | the error's own message           |
//! | `&str` / `String`                               | `panic error: <text>`             |
//! | any primitive integer                           | `panic error: code = <decimal>`   |
//! | anything else                                   | `panic error: unexpected error.`  |
//!
//! Error types outside this crate are formatted under `catch_unwind`; if their `Display` panics
//! the result is `panic error: unexpected error.` as well.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use thiserror::Error;
use tracing::error;

/// Marker prepended to messages recovered from non-error panic payloads.
pub const PANIC_PREFIX: &str = "panic error: ";

const UNEXPECTED_PANIC: &str = "panic error: unexpected error.";

/// Message-only error handed to host callers. It carries nothing but text, so it is always safe
/// to send across a language boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BasicError {
    message: String,
}

impl BasicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Shape of a recovered panic payload.
pub enum PanicPayload<'a> {
    /// A [`BasicError`] or [`crate::Error`] was passed to `panic_any`.
    Error(&'a dyn fmt::Display),
    /// An error type from outside this crate, whose `Display` may itself panic.
    ForeignError(&'a dyn fmt::Display),
    /// `panic!("...")` or a panic with a string payload.
    Message(&'a str),
    /// A numeric status code was passed to `panic_any`.
    Code(&'a dyn fmt::Display),
    Unknown,
}

macro_rules! downcast_code {
    ($payload:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Some(code) = $payload.downcast_ref::<$ty>() {
                return PanicPayload::Code(code);
            }
        )+
    };
}

impl<'a> PanicPayload<'a> {
    /// Classifies the payload, checking error types first, then text, then integers.
    pub fn classify(payload: &'a (dyn Any + Send)) -> Self {
        if let Some(err) = payload.downcast_ref::<BasicError>() {
            return PanicPayload::Error(err);
        }
        if let Some(err) = payload.downcast_ref::<crate::Error>() {
            return PanicPayload::Error(err);
        }
        if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
            return PanicPayload::ForeignError(err);
        }
        if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send>>() {
            return PanicPayload::ForeignError(err);
        }
        if let Some(err) = payload.downcast_ref::<io::Error>() {
            return PanicPayload::ForeignError(err);
        }

        if let Some(msg) = payload.downcast_ref::<&'static str>() {
            return PanicPayload::Message(msg);
        }
        if let Some(msg) = payload.downcast_ref::<String>() {
            return PanicPayload::Message(msg);
        }

        downcast_code!(
            payload, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
        );

        PanicPayload::Unknown
    }

    pub fn into_error(self) -> BasicError {
        match self {
            PanicPayload::Error(err) => BasicError::new(err.to_string()),
            PanicPayload::ForeignError(err) => BasicError::new(
                display_caught(err).unwrap_or_else(|| UNEXPECTED_PANIC.to_string()),
            ),
            PanicPayload::Message(msg) => BasicError::new(format!("{PANIC_PREFIX}{msg}")),
            PanicPayload::Code(code) => BasicError::new(format!("{PANIC_PREFIX}code = {code}")),
            PanicPayload::Unknown => BasicError::new(UNEXPECTED_PANIC),
        }
    }
}

/// Formats `value`, returning `None` if its `Display` panics.
fn display_caught(value: &dyn fmt::Display) -> Option<String> {
    panic::catch_unwind(AssertUnwindSafe(|| value.to_string())).ok()
}

/// Converts a recovered panic payload into a [`BasicError`]. Never panics.
pub fn normalize(payload: &(dyn Any + Send)) -> BasicError {
    PanicPayload::classify(payload).into_error()
}

/// [`normalize`] for use inside a panic hook, where a second panic aborts the process and
/// cannot be caught: foreign error payloads are named, never formatted.
pub(crate) fn normalize_in_hook(payload: &(dyn Any + Send)) -> BasicError {
    match PanicPayload::classify(payload) {
        PanicPayload::ForeignError(_) => BasicError::new(format!("{PANIC_PREFIX}error payload")),
        classified => classified.into_error(),
    }
}

/// Detaches an error returned through normal control flow from its concrete type, keeping only
/// its message. Normalizing an already normalized error yields an equal error. A `Display` that
/// panics yields `panic error: unexpected error.`.
pub fn normalize_error<E: fmt::Display>(err: E) -> BasicError {
    BasicError::new(display_caught(&err).unwrap_or_else(|| UNEXPECTED_PANIC.to_string()))
}

fn recovered(payload: Box<dyn Any + Send>) -> BasicError {
    let err = normalize(&*payload);
    error!(error = %err, "Recovered from panic at export boundary");
    err
}

/// Runs `body`, turning a panic or a returned error into a [`BasicError`].
pub fn guard<T, E, F>(body: F) -> Result<T, BasicError>
where
    F: FnOnce() -> Result<T, E>,
    E: fmt::Display,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result.map_err(normalize_error),
        Err(payload) => Err(recovered(payload)),
    }
}

/// Async flavour of [`guard`], for exports that are driven on a runtime.
pub async fn guard_async<T, E, Fut>(fut: Fut) -> Result<T, BasicError>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(normalize_error),
        Err(payload) => Err(recovered(payload)),
    }
}

/// Runs `body` against `slot`. If `body` panics, the slot is overwritten with the normalized
/// panic. Otherwise the slot keeps whatever `body` left in it, including an error it returned
/// on purpose.
pub fn guard_and_normalize<T, F>(slot: &mut Result<T, BasicError>, body: F)
where
    F: FnOnce(&mut Result<T, BasicError>),
{
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *slot))) {
        *slot = Err(recovered(payload));
    }
}

#[cfg(test)]
mod tests {
    use std::panic::panic_any;

    use super::*;

    fn panicking<T>(payload: T) -> Result<(), BasicError>
    where
        T: Any + Send + 'static,
    {
        guard(|| -> Result<(), BasicError> { panic_any(payload) })
    }

    #[test]
    fn structured_error_keeps_its_message() {
        let err = panicking(BasicError::new("boom")).unwrap_err();
        assert_eq!(err.message(), "boom");

        let err = panicking(crate::Error::Config("boom".into())).unwrap_err();
        assert_eq!(err.message(), "Config Error - boom");

        let boxed: Box<dyn std::error::Error + Send + Sync> = "boom".into();
        let err = panicking(boxed).unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn text_payload_gets_prefix() {
        let err = guard(|| -> Result<(), BasicError> { panic!("boom") }).unwrap_err();
        assert_eq!(err.message(), "panic error: boom");

        let item = 7;
        let err = guard(|| -> Result<(), BasicError> { panic!("bad item {item}") }).unwrap_err();
        assert_eq!(err.message(), "panic error: bad item 7");
    }

    #[test]
    fn numeric_payload_is_rendered_as_code() {
        assert_eq!(
            panicking(42).unwrap_err().message(),
            "panic error: code = 42"
        );
        assert_eq!(
            panicking(-3i64).unwrap_err().message(),
            "panic error: code = -3"
        );
        assert_eq!(
            panicking(7usize).unwrap_err().message(),
            "panic error: code = 7"
        );
    }

    #[test]
    fn unknown_payload_is_generic() {
        assert_eq!(
            panicking(1.5f64).unwrap_err().message(),
            "panic error: unexpected error."
        );
        assert_eq!(
            panicking(vec![1u8, 2]).unwrap_err().message(),
            "panic error: unexpected error."
        );
    }

    #[test]
    fn returned_error_is_not_treated_as_panic() {
        let result = guard(|| Err::<(), _>(crate::Error::Runtime("closed".into())));
        assert_eq!(result.unwrap_err().message(), "Runtime Error - closed");

        let result = guard(|| Ok::<_, BasicError>(5));
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn normalize_error_is_idempotent() {
        let once = normalize_error("boom");
        let twice = normalize_error(once.clone());
        assert_eq!(once, twice);
    }

    struct Unprintable;

    impl fmt::Debug for Unprintable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Unprintable")
        }
    }

    impl fmt::Display for Unprintable {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display exploded")
        }
    }

    impl std::error::Error for Unprintable {}

    #[test]
    fn foreign_error_payloads_keep_their_message() {
        let boxed: Box<dyn std::error::Error + Send> = Box::new(io::Error::other("disk gone"));
        assert_eq!(panicking(boxed).unwrap_err().message(), "disk gone");

        let err = io::Error::new(io::ErrorKind::TimedOut, "rpc timed out");
        assert_eq!(panicking(err).unwrap_err().message(), "rpc timed out");
    }

    #[test]
    fn panicking_display_does_not_escape_the_guard() {
        let outer = panic::catch_unwind(|| {
            let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(Unprintable);
            panicking(boxed)
        });
        let err = outer.expect("guard let the unwind escape").unwrap_err();
        assert_eq!(err.message(), "panic error: unexpected error.");

        let outer = panic::catch_unwind(|| guard(|| Err::<(), _>(Unprintable)));
        let err = outer.expect("guard let the unwind escape").unwrap_err();
        assert_eq!(err.message(), "panic error: unexpected error.");
    }

    #[test]
    fn hook_never_formats_foreign_errors() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(Unprintable);
        assert_eq!(
            normalize_in_hook(&boxed).message(),
            "panic error: error payload"
        );
        assert_eq!(
            normalize_in_hook(&BasicError::new("boom")).message(),
            "boom"
        );
        assert_eq!(normalize_in_hook(&7u8).message(), "panic error: code = 7");
    }

    #[test]
    fn slot_receives_normalized_panic() {
        let mut slot: Result<u32, BasicError> = Ok(0);
        guard_and_normalize(&mut slot, |slot| {
            *slot = Ok(1);
            panic_any(42);
        });
        assert_eq!(slot, Err(BasicError::new("panic error: code = 42")));
    }

    #[test]
    fn slot_keeps_returned_error() {
        let mut slot: Result<u32, BasicError> = Ok(0);
        guard_and_normalize(&mut slot, |slot| {
            *slot = Err(BasicError::new("insufficient balance"));
        });
        assert_eq!(slot, Err(BasicError::new("insufficient balance")));
    }

    #[test]
    fn slot_untouched_without_panic() {
        let mut slot: Result<u32, BasicError> = Ok(9);
        guard_and_normalize(&mut slot, |_| {});
        assert_eq!(slot, Ok(9));

        let mut slot: Result<u32, BasicError> = Err(BasicError::new("earlier"));
        guard_and_normalize(&mut slot, |_| {});
        assert_eq!(slot, Err(BasicError::new("earlier")));
    }

    #[tokio::test]
    async fn async_guard_recovers_panics() {
        let result = guard_async(async {
            tokio::task::yield_now().await;
            if true {
                panic!("boom");
            }
            Ok::<(), BasicError>(())
        })
        .await;
        assert_eq!(result.unwrap_err().message(), "panic error: boom");

        let result = guard_async(async { Err::<(), _>("rpc timeout") }).await;
        assert_eq!(result.unwrap_err().message(), "rpc timeout");
    }
}
