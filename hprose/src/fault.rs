//! Fault boundaries around externally supplied code.
//!
//! Filters, handlers, events and registered functions are all run through
//! one of these wrappers, so a panic in any of them surfaces as an
//! [`ErrorKind::Panic`](crate::ErrorKind::Panic) error instead of unwinding
//! into the dispatch loop or the connection task.

use std::{
    backtrace::Backtrace, cell::RefCell, future::Future, panic::AssertUnwindSafe, sync::Once,
};

use futures::FutureExt;

use crate::{Error, Result};

thread_local! {
    static PANIC_STACK: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records the stack of the panicking thread while
/// its frames are still live. The previous hook still runs.
fn install_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture();
            let _ = PANIC_STACK.try_with(|cell| *cell.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// Takes the stack recorded by the last panic on this thread, if any.
pub(crate) fn take_panic_stack() -> Option<Backtrace> {
    PANIC_STACK
        .try_with(|cell| cell.borrow_mut().take())
        .ok()
        .flatten()
}

/// Runs a synchronous callback, converting a panic into an error.
pub fn guard<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    install_hook();
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::panic(payload)),
    }
}

/// Awaits a future, converting a panic raised while polling it into an
/// error.
pub async fn guard_async<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    install_hook();
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_guard() {
        assert_eq!(guard(|| Ok(1)), Ok(1));

        let err = guard(|| -> Result<()> { panic!("bad filter") }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Panic);
        assert_eq!(err.msg, "bad filter");
        assert!(err.stack.is_some());
        assert!(take_panic_stack().is_none());
    }

    #[inline(never)]
    fn failing_filter_step() -> Result<()> {
        panic!("deep")
    }

    #[test]
    fn test_stack_of_panic_site() {
        let err = guard(failing_filter_step).unwrap_err();
        assert!(err.stack.unwrap().contains("failing_filter_step"));
    }

    #[tokio::test]
    async fn test_guard_async() {
        let value = 42;
        let err = guard_async(async {
            tokio::task::yield_now().await;
            if value == 42 {
                panic!("late {value}");
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Panic);
        assert_eq!(err.msg, "late 42");

        let err = guard_async::<(), _>(async { Err(Error::invoke("plain")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invoke);
    }
}
