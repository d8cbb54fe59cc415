//! Named background routines owned by the current leader term.
//!
//! Each routine runs in its own task under a child cancellation scope of the
//! term. Starting a name that is already running is a no-op, so leadership
//! establishment can be retried safely.

use crate::cancel::{CancellationSource, CancellationToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::Instrument;
use xdc_core::ReplicationError;

struct RoutineHandle {
    cancel: CancellationSource,
    handle: JoinHandle<()>,
}

impl RoutineHandle {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    async fn shutdown(self, name: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(routine = name, "leader routine panicked");
            }
        }
    }
}

#[derive(Default)]
pub struct RoutineManager {
    routines: Mutex<HashMap<String, RoutineHandle>>,
}

impl RoutineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `routine` under a child of `parent` unless `name` is running.
    ///
    /// Returns whether a new task was spawned. A routine that finished on
    /// its own (successfully or not) can be started again.
    pub fn start<F, Fut>(&self, parent: &CancellationToken, name: &str, routine: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), ReplicationError>> + Send + 'static,
    {
        let mut routines = self.routines.lock();
        if routines.get(name).is_some_and(RoutineHandle::is_running) {
            tracing::debug!(routine = name, "leader routine already running");
            return false;
        }

        let cancel = parent.child();
        let fut = routine(cancel.token());
        let span = tracing::info_span!("leader_routine", routine = name);
        let handle = tokio::spawn(
            async move {
                tracing::debug!("started leader routine");
                match fut.await {
                    Ok(()) => tracing::debug!("stopped leader routine"),
                    Err(e) => tracing::error!(error = %e, "leader routine exited with error"),
                }
            }
            .instrument(span),
        );

        routines.insert(name.to_string(), RoutineHandle { cancel, handle });
        true
    }

    /// Cancel `name` and wait for it to exit. Returns whether it was known.
    pub async fn stop(&self, name: &str) -> bool {
        let routine = self.routines.lock().remove(name);
        match routine {
            Some(routine) => {
                routine.shutdown(name).await;
                true
            }
            None => false,
        }
    }

    /// Cancel every routine and wait for all of them to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, RoutineHandle)> = self.routines.lock().drain().collect();
        for (_, routine) in &drained {
            routine.cancel.cancel();
        }
        for (name, routine) in drained {
            routine.shutdown(&name).await;
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.routines
            .lock()
            .get(name)
            .is_some_and(RoutineHandle::is_running)
    }

    /// Names of the routines still running, sorted
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .routines
            .lock()
            .iter()
            .filter(|(_, routine)| routine.is_running())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for RoutineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineManager")
            .field("running", &self.running())
            .finish()
    }
}
