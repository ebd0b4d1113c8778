// dispatch.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use metrics::counter;
use tracing::{info, warn};

use crate::lamp::{BatchReport, LampClient};
use crate::scene::SceneEngine;

/// Fans one scene application out to every lamp endpoint and joins on all
/// of them settling. Owns the pending-application flag so at most one
/// application is ever in flight.
pub struct Dispatcher {
    engine: Arc<SceneEngine>,
    client: Arc<dyn LampClient>,
    pending: AtomicBool,
}

impl Dispatcher {
    pub fn new(engine: Arc<SceneEngine>, client: Arc<dyn LampClient>) -> Self {
        Self {
            engine,
            client,
            pending: AtomicBool::new(false),
        }
    }

    /// Claims the pending slot. Returns false if an application is already
    /// scheduled or in flight.
    pub fn try_begin(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Applies the scene that is current at call time. Every batch is
    /// launched before any is awaited, failures never short-circuit the
    /// join, and the pending flag clears only after all batches settled.
    /// Returns the settlement totals across all batches.
    pub async fn apply_scene(&self) -> BatchReport {
        let scene = self.engine.current();
        let batches = self.engine.current_commands();
        info!(scene, endpoints = batches.len(), "applying scene");
        counter!("scene_applications_total").increment(1);

        let mut lens = Vec::with_capacity(batches.len());
        let mut tasks = Vec::with_capacity(batches.len());
        for batch in batches {
            let client = Arc::clone(&self.client);
            lens.push(batch.commands.len());
            tasks.push(tokio::spawn(async move {
                match client.apply_batch(&batch).await {
                    Ok(report) => report,
                    Err(error) => {
                        warn!(endpoint = %batch.endpoint, %error, "lamp batch failed");
                        counter!("lamp_batch_failures_total").increment(1);
                        BatchReport::all_failed(batch.commands.len())
                    }
                }
            }));
        }

        let mut totals = BatchReport::default();
        for (commands, settled) in lens.into_iter().zip(join_all(tasks).await) {
            match settled {
                Ok(report) => {
                    totals.succeeded += report.succeeded;
                    totals.failed += report.failed;
                }
                Err(error) => {
                    warn!(%error, "lamp batch task panicked");
                    totals.failed += commands;
                }
            }
        }
        info!(
            scene,
            succeeded = totals.succeeded,
            failed = totals.failed,
            "scene application settled"
        );
        self.pending.store(false, Ordering::SeqCst);
        totals
    }
}
