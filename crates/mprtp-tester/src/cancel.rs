//! # Cancellation Gate
//!
//! Turns termination requests into a bounded stop protocol:
//!
//! - **first request**: the current run is shut down through its normal
//!   stop sequence, then the process exits with success;
//! - **any later request**: the process exits immediately, abandoning
//!   whatever cleanup is still in flight (typically the helper drain wait).
//!
//! Requests arrive over a channel so the gate can be fed by OS signals in
//! the binary and by plain messages in tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;

use crate::lifecycle::{LifecycleController, StopCause};

/// Kind of termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupt,
    Terminate,
}

/// How the gate answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Run the stop sequence, then exit.
    Graceful,
    /// Exit now.
    Forced,
}

/// Called with the exit code once the process should terminate.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

pub fn process_exit() -> ExitHook {
    Arc::new(|code| std::process::exit(code))
}

pub struct CancellationGate {
    hits: AtomicU32,
    current: ArcSwapOption<LifecycleController>,
    exit: ExitHook,
}

impl CancellationGate {
    pub fn new(exit: ExitHook) -> Self {
        Self {
            hits: AtomicU32::new(0),
            current: ArcSwapOption::empty(),
            exit,
        }
    }

    /// Make `controller` the run a graceful stop applies to.
    pub fn attach(&self, controller: Arc<LifecycleController>) {
        self.current.store(Some(controller));
    }

    pub fn detach(&self) {
        self.current.store(None);
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Handle one termination request.
    pub fn request(&self, kind: SignalKind) -> Tier {
        if self.hits.fetch_add(1, Ordering::SeqCst) > 0 {
            tracing::warn!(?kind, "repeated termination request, exiting now");
            (self.exit)(0);
            return Tier::Forced;
        }

        tracing::info!(?kind, "termination requested, stopping run");
        let current = self.current.load_full();
        let exit = self.exit.clone();
        tokio::spawn(async move {
            if let Some(ctrl) = current {
                ctrl.shutdown(StopCause::Signal).await;
            }
            exit(0);
        });
        Tier::Graceful
    }

    /// Consume requests until the sender side closes.
    pub async fn listen(self: Arc<Self>, mut requests: mpsc::Receiver<SignalKind>) {
        while let Some(kind) = requests.recv().await {
            self.request(kind);
        }
    }
}

/// Forward SIGINT and SIGTERM into a request channel.
#[cfg(unix)]
pub fn spawn_os_listener() -> std::io::Result<mpsc::Receiver<SignalKind>> {
    use tokio::signal::unix::{signal, SignalKind as OsSignal};

    let mut interrupt = signal(OsSignal::interrupt())?;
    let mut terminate = signal(OsSignal::terminate())?;
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            let kind = tokio::select! {
                Some(()) = interrupt.recv() => SignalKind::Interrupt,
                Some(()) = terminate.recv() => SignalKind::Terminate,
                else => break,
            };
            if tx.send(kind).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

#[cfg(not(unix))]
pub fn spawn_os_listener() -> std::io::Result<mpsc::Receiver<SignalKind>> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(SignalKind::Interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}
