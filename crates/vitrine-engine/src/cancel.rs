use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation flag shared between a caller and a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bounds for one outbound call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl CallContext {
    pub fn new(timeout: Duration, cancel: &CancelToken) -> Self {
        Self {
            timeout,
            cancel: cancel.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Interrupted {
    #[error("call cancelled")]
    Cancelled,
    #[error("call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Run a blocking call on a helper thread and stop waiting for it on cancellation or
/// timeout. An abandoned call finishes in the background and its result is dropped.
pub fn run_bounded<T, F>(ctx: &CallContext, call: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    if ctx.cancel.is_cancelled() {
        return Err(Interrupted::Cancelled.into());
    }
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("vitrine-call".to_string())
        .spawn(move || {
            let _ = tx.send(call());
        })?;

    let deadline = Instant::now() + ctx.timeout;
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Interrupted::TimedOut(ctx.timeout).into());
        }
        match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
            Ok(result) => return result,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("call worker exited without a result")
            }
        }
    }
}

pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Interrupted>() == Some(&Interrupted::Cancelled))
}

pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(cause.downcast_ref::<Interrupted>(), Some(Interrupted::TimedOut(_)))
            || cause
                .downcast_ref::<reqwest::Error>()
                .map(|reqwest_err| reqwest_err.is_timeout())
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{is_cancellation, is_timeout, run_bounded, CallContext, CancelToken};

    #[test]
    fn returns_result_of_fast_call() -> anyhow::Result<()> {
        let ctx = CallContext::new(Duration::from_secs(5), &CancelToken::new());
        let value = run_bounded(&ctx, || Ok(41 + 1))?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[test]
    fn slow_call_times_out() {
        let ctx = CallContext::new(Duration::from_millis(50), &CancelToken::new());
        let err = run_bounded(&ctx, || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(is_timeout(&err));
        assert!(!is_cancellation(&err));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = CallContext::new(Duration::from_secs(5), &cancel);
        let err = run_bounded(&ctx, || Ok(())).unwrap_err();
        assert!(is_cancellation(&err));
    }

    #[test]
    fn cancelling_mid_call_stops_waiting() {
        let cancel = CancelToken::new();
        let ctx = CallContext::new(Duration::from_secs(10), &cancel);
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });
        let err = run_bounded(&ctx, || {
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();
        assert!(is_cancellation(&err));
    }
}
