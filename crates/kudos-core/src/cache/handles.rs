//! Handles for background cache work
//!
//! Every background operation is fire-and-forget: dropping a handle does not
//! cancel the work. Hosts and tests that want to observe completion await the
//! handle instead.

use crate::error::RefreshReport;
use tokio::task::JoinHandle;
use tracing::warn;

/// Background fetches started by a preload call
#[derive(Debug, Default)]
pub struct Pending {
    handles: Vec<JoinHandle<()>>,
}

impl Pending {
    pub(crate) fn new(handles: Vec<JoinHandle<()>>) -> Self {
        Self { handles }
    }

    /// Number of fetches started
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every fetch to settle
    pub async fn wait(self) {
        join_all(self.handles).await;
    }
}

/// Progress of `KudosCache::initialize`
#[derive(Debug)]
pub struct Warmup {
    loads: Vec<JoinHandle<()>>,
    refresh: JoinHandle<RefreshReport>,
}

impl Warmup {
    pub(crate) fn new(loads: Vec<JoinHandle<()>>, refresh: JoinHandle<RefreshReport>) -> Self {
        Self { loads, refresh }
    }

    /// Wait until every persisted category has been read into the mirror.
    ///
    /// The background refresh keeps running.
    pub async fn loaded(&mut self) {
        join_all(std::mem::take(&mut self.loads)).await;
    }

    /// Wait for warm-up and the background refresh it triggered
    pub async fn finish(mut self) -> RefreshReport {
        self.loaded().await;
        match self.refresh.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Background refresh task failed");
                RefreshReport::new()
            }
        }
    }
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            warn!(error = %e, "Background cache task failed");
        }
    }
}
