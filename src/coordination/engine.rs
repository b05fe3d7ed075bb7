//! Multi-swap supervisor

use super::coordinator::{SwapContext, SwapCoordinator};
use super::plan::SwapPlan;
use crate::error::ResolverResult;
use crate::swap::SwapState;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How one swap ended
#[derive(Debug)]
pub struct SwapOutcome {
    pub swap_id: Uuid,
    pub result: ResolverResult<SwapState>,
}

impl SwapOutcome {
    /// Withdrawn, or refunded after a cancellation deadline
    pub fn is_safe(&self) -> bool {
        match &self.result {
            Ok(state) => *state == SwapState::Withdrawn,
            Err(e) => e.is_safe_outcome(),
        }
    }
}

/// Runs one coordinator task per swap.
///
/// Coordinators share only the read-only context; each owns its swap.
pub struct ResolverEngine {
    ctx: SwapContext,
    shutdown: watch::Sender<bool>,
}

impl ResolverEngine {
    pub fn new(ctx: SwapContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { ctx, shutdown }
    }

    pub fn context(&self) -> &SwapContext {
        &self.ctx
    }

    /// Drive every plan to completion, concurrently.
    ///
    /// Returns early with the swaps finished so far if `stop` is called;
    /// unfinished coordinators are aborted and their last checkpoint stays in
    /// the store.
    pub async fn run(&self, plans: Vec<SwapPlan>) -> Vec<SwapOutcome> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            warn!("Resolver engine already stopped; not starting {} swaps", plans.len());
            return Vec::new();
        }

        let mut handles = Vec::with_capacity(plans.len());
        for plan in plans {
            let mut coordinator = SwapCoordinator::new(self.ctx.clone(), plan);
            let swap_id = coordinator.id();
            let handle = tokio::spawn(async move {
                let result = coordinator.run().await;
                SwapOutcome { swap_id, result }
            });
            handles.push((swap_id, handle));
        }
        info!("Resolver engine started {} swaps", handles.len());

        let aborts: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();
        let ids: Vec<Uuid> = handles.iter().map(|(id, _)| *id).collect();
        let joined = join_all(handles.into_iter().map(|(_, h)| h));

        tokio::select! {
            results = joined => {
                results
                    .into_iter()
                    .zip(ids)
                    .filter_map(|(joined, swap_id)| match joined {
                        Ok(outcome) => Some(outcome),
                        Err(e) => {
                            error!("Coordinator for swap {} panicked: {}", swap_id, e);
                            None
                        }
                    })
                    .collect()
            }
            _ = shutdown.wait_for(|stopped| *stopped) => {
                warn!("Shutdown requested; aborting {} coordinators", aborts.len());
                for abort in aborts {
                    abort.abort();
                }
                Vec::new()
            }
        }
    }

    /// Ask `run` to stop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("Resolver engine stopping");
    }
}

/// Count outcomes into (safe, failed)
pub fn summarize(outcomes: &[SwapOutcome]) -> (usize, usize) {
    let safe = outcomes.iter().filter(|o| o.is_safe()).count();
    (safe, outcomes.len() - safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolverError;

    #[test]
    fn test_summarize_separates_safe_outcomes() {
        let id = Uuid::new_v4();
        let outcomes = vec![
            SwapOutcome {
                swap_id: id,
                result: Ok(SwapState::Withdrawn),
            },
            SwapOutcome {
                swap_id: id,
                result: Err(ResolverError::CancellationTriggered {
                    swap_id: id,
                    leg: crate::swap::Leg::Source,
                }
                .halted(id, None, SwapState::Cancelled)),
            },
            SwapOutcome {
                swap_id: id,
                result: Err(ResolverError::Timeout {
                    operation: "confirmation".to_string(),
                }),
            },
        ];
        assert_eq!(summarize(&outcomes), (2, 1));
    }
}
