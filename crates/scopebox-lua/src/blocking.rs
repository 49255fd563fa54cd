//! Async → sync bridge for Lua callbacks.
//!
//! Lua callbacks are synchronous, while process and HTTP I/O are tokio
//! futures. Evaluation always runs on a blocking-pool thread, so the
//! callback can park that thread on the runtime handle.

use std::future::Future;

/// Runs `fut` to completion from synchronous code.
///
/// Inside a tokio runtime the current handle drives the future
/// (`block_in_place` keeps multi-thread workers usable). Outside any
/// runtime a throwaway current-thread runtime is built.
///
/// # Errors
///
/// Fails only if a fallback runtime cannot be constructed.
pub(crate) fn block_on<F: Future>(fut: F) -> std::io::Result<F::Output> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            Ok(runtime.block_on(fut))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_without_runtime() {
        let value = block_on(async { 40 + 2 }).expect("fallback runtime");
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn works_from_blocking_thread() {
        let value = tokio::task::spawn_blocking(|| {
            block_on(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                7
            })
        })
        .await
        .expect("join")
        .expect("bridge");
        assert_eq!(value, 7);
    }
}
