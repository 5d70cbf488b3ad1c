//! Bounded fan-out of drafted requests to the platform

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::context::ProcessingContext;
use super::error::ProcessingError;
use crate::platform::PlatformClient;

/// Shared cancellation token, checked before every platform call
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sends drafted requests to the platform with at most `workers`
/// calls in flight
pub struct Dispatcher {
    platform: Arc<dyn PlatformClient>,
    permits: Arc<Semaphore>,
    cancel: CancellationFlag,
}

impl Dispatcher {
    pub fn new(platform: Arc<dyn PlatformClient>, workers: usize) -> Self {
        Self {
            platform,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Send every drafted request and wait for all of them.
    ///
    /// Results are recorded on the requests. A failed request never
    /// rolls back its siblings.
    pub async fn dispatch_inbound(
        &self,
        mut contexts: Vec<ProcessingContext>,
    ) -> Vec<ProcessingContext> {
        let mut workers = JoinSet::new();

        for (ci, ctx) in contexts.iter().enumerate() {
            if !ctx.send_payload {
                continue;
            }
            for (ri, request) in ctx.requests.iter().enumerate() {
                if request.error.is_some() {
                    continue;
                }
                let platform = self.platform.clone();
                let permits = self.permits.clone();
                let cancel = self.cancel.clone();
                let request = request.clone();

                workers.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return (ci, ri, Err(ProcessingError::Cancelled));
                    };
                    if cancel.is_cancelled() {
                        return (ci, ri, Err(ProcessingError::Cancelled));
                    }
                    let result = platform
                        .create_or_update(&request)
                        .await
                        .map_err(ProcessingError::from);
                    (ci, ri, result)
                });
            }
        }

        while let Some(joined) = workers.join_next().await {
            let (ci, ri, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Dispatcher: worker failed: {}", e);
                    continue;
                }
            };
            let ctx = &mut contexts[ci];
            let mapping_id = ctx.mapping.id.clone();
            let request = &mut ctx.requests[ri];
            match result {
                Ok(response) => {
                    debug!(
                        "Mapping '{}': {} request {} accepted",
                        mapping_id, request.api, request.index
                    );
                    request.response = Some(response);
                }
                Err(e) => {
                    warn!(
                        "Mapping '{}': {} request {} failed: {}",
                        mapping_id, request.api, request.index, e
                    );
                    request.error = Some(e);
                }
            }
        }

        contexts
    }
}
