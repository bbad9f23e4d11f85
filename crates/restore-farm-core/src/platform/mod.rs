use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_SLICE: Duration = Duration::from_millis(50);

/// Shared abort flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run a blocking filesystem call so that a stalled mount cannot hold the
/// caller hostage.
///
/// Without a timeout the call runs inline and only the pre-check honours the
/// token. With a timeout the call runs on a helper thread; the caller returns
/// `TimedOut` once the deadline passes or `Interrupted` as soon as the token
/// is cancelled. An abandoned helper finishes (or stays stuck) on its own.
pub fn guarded<T, F>(timeout: Option<Duration>, cancel: &CancelToken, op: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(io::Error::new(ErrorKind::Interrupted, "operation cancelled"));
    }

    let Some(timeout) = timeout else {
        return op();
    };

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("fs-guard".to_string())
        .spawn(move || {
            let _ = tx.send(op());
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(io::Error::new(
                ErrorKind::TimedOut,
                format!("filesystem call exceeded {:.1}s", timeout.as_secs_f64()),
            ));
        }
        match rx.recv_timeout((deadline - now).min(POLL_SLICE)) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return Err(io::Error::new(ErrorKind::Interrupted, "operation cancelled"));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(
                    ErrorKind::Other,
                    "filesystem worker exited without a result",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_when_no_timeout() {
        let token = CancelToken::new();
        let value = guarded(None, &token, || Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let err = guarded(None, &token, || Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
    }

    #[test]
    fn test_stalled_call_times_out() {
        let token = CancelToken::new();
        let err = guarded(Some(Duration::from_millis(100)), &token, || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let token = CancelToken::new();
        let remote = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });
        let started = Instant::now();
        let err = guarded(Some(Duration::from_secs(10)), &token, || {
            thread::sleep(Duration::from_secs(3));
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
