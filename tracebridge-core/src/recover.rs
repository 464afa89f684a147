//! # Panic Recovery
//!
//! Handler panics are contained at the boundary that invoked the handler: the panic is
//! caught, described by a [`Recovered`] value (message plus a single-line stack), and the
//! boundary turns it into a generic error response.
//!
//! The stack is recorded by a panic hook, chained in front of the previously installed one,
//! into a thread-local slot. Unwinding stays on the panicking thread until it reaches
//! [`catch_panic`], which reads the slot back.
use futures_util::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// A panic caught at a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub message: String,
    /// The stack at the panic site, newlines replaced by a literal `\n`.
    pub stack: String,
}

/// Installs the stack-recording panic hook. Idempotent.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// Polls `future` to completion, converting a panic into [`Recovered`].
pub async fn catch_panic<F>(future: F) -> Result<F::Output, Recovered>
where
    F: Future,
{
    install_panic_hook();
    PANIC_STACK.with(|slot| slot.borrow_mut().take());

    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| {
            let stack = PANIC_STACK
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| Backtrace::force_capture().to_string());

            Recovered {
                message: panic_message(payload.as_ref()),
                stack: flatten(&stack),
            }
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn flatten(stack: &str) -> String {
    stack.trim_end().replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_future_passes_through() {
        let result = catch_panic(async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_panic_is_converted() {
        let result = catch_panic(async {
            panic!("boom");
        })
        .await;

        let recovered = result.unwrap_err();
        assert_eq!(recovered.message, "boom");
        assert!(!recovered.stack.is_empty());
        assert!(!recovered.stack.contains('\n'));
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let id = 7;
        let result: Result<(), _> = catch_panic(async move {
            panic!("handler {id} exploded");
        })
        .await;

        assert_eq!(result.unwrap_err().message, "handler 7 exploded");
    }

    #[test]
    fn test_flatten_is_single_line() {
        assert_eq!(flatten("a\nb\nc\n"), "a\\nb\\nc");
    }
}
