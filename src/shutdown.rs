//! Shutdown coordination.
//!
//! The server facade owns a [`ShutdownToken`] and hands clones to the
//! reactor and the signal watcher. Signal handling only flips the token; the
//! reactor observes it at the top of every loop iteration and is woken
//! immediately when a waker is attached.

use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

struct ShutdownState {
    triggered: AtomicBool,
    waker: Mutex<Option<Arc<Waker>>>,
}

/// Cloneable shutdown flag.
#[derive(Clone)]
pub struct ShutdownToken {
    state: Arc<ShutdownState>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ShutdownState {
                triggered: AtomicBool::new(false),
                waker: Mutex::new(None),
            }),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if self.state.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested");
        self.wake();
    }

    pub fn is_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::SeqCst)
    }

    /// Attach the reactor's waker so `trigger` interrupts a pending poll.
    pub fn attach_waker(&self, waker: Arc<Waker>) {
        *self.state.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(waker);
        // Covers a trigger that raced with attaching.
        if self.is_triggered() {
            self.wake();
        }
    }

    fn wake(&self) {
        let waker = self.state.waker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(waker) = waker.as_ref() {
            if let Err(e) = waker.wake() {
                debug!(error = %e, "Failed to wake reactor");
            }
        }
    }
}

/// Block until SIGINT or SIGTERM arrives, then trigger `token`.
///
/// Runs a current-thread tokio runtime on the calling thread; intended to
/// be spawned on its own thread by `main`.
pub fn watch_signals(token: ShutdownToken) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;

    runtime.block_on(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                res = tokio::signal::ctrl_c() => res?,
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received");
        token.trigger();
        Ok::<(), std::io::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::time::Duration;

    #[test]
    fn test_trigger_is_shared() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_triggered());

        token.trigger();
        token.trigger();
        assert!(clone.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_poll() {
        let mut poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(7)).unwrap());
        let token = ShutdownToken::new();
        token.attach_waker(waker);

        token.trigger();

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(7)));
    }
}
