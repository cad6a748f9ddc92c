//! Decoupled job submission.
//!
//! Any part of the host application holding a [`JobDispatcher`] handle can
//! request output without a reference to the renderer. Every submission is
//! fanned out to all live [`JobReceiver`]s. There is no acknowledgement, no
//! deduplication and no backpressure: each submit becomes one job.

use crate::job::{JobId, JobKind, JobPayload, LabelPayload, PrintJob, ReportPayload};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct JobDispatcher {
    inner: Arc<DispatchState>,
}

#[derive(Default)]
struct DispatchState {
    next_id: AtomicU64,
    listeners: Mutex<Vec<mpsc::UnboundedSender<PrintJob>>>,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> JobReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push(tx);
        }
        JobReceiver { rx }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .map(|mut listeners| {
                listeners.retain(|tx| !tx.is_closed());
                listeners.len()
            })
            .unwrap_or(0)
    }

    /// Announces a job from a loose payload record. Fire and forget.
    pub fn submit(&self, kind: JobKind, payload: Value) {
        self.submit_payload(JobPayload::from_record(kind, &payload));
    }

    pub fn submit_label(&self, payload: LabelPayload) {
        self.submit_payload(JobPayload::Label(payload));
    }

    pub fn submit_report(&self, payload: ReportPayload) {
        self.submit_payload(JobPayload::Report(payload));
    }

    fn submit_payload(&self, payload: JobPayload) {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let job = PrintJob::new(id, payload);
        info!(job = %job.id, kind = %job.kind(), fingerprint = %job.fingerprint, "print requested");

        let Ok(mut listeners) = self.inner.listeners.lock() else {
            warn!(job = %job.id, "dispatcher listener registry poisoned; job dropped");
            return;
        };
        listeners.retain(|tx| !tx.is_closed());
        if listeners.is_empty() {
            warn!(job = %job.id, "no print listener mounted; job dropped");
            return;
        }
        for tx in listeners.iter() {
            if tx.send(job.clone()).is_err() {
                debug!(job = %job.id, "listener went away during fan-out");
            }
        }
    }
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<PrintJob>,
}

impl JobReceiver {
    /// Next announced job, or `None` once every dispatcher handle is gone.
    pub async fn next_job(&mut self) -> Option<PrintJob> {
        self.rx.recv().await
    }

    pub fn try_next_job(&mut self) -> Option<PrintJob> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fans_out_to_every_listener() {
        let dispatcher = JobDispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.submit(JobKind::Label, json!({"code": "B-001"}));

        let ja = a.next_job().await.expect("listener a");
        let jb = b.next_job().await.expect("listener b");
        assert_eq!(ja.id, jb.id);
        assert_eq!(ja.kind(), JobKind::Label);
    }

    #[tokio::test]
    async fn repeated_submissions_are_not_deduplicated() {
        let dispatcher = JobDispatcher::new();
        let mut rx = dispatcher.subscribe();
        for _ in 0..3 {
            dispatcher.submit_label(LabelPayload::default().with_code("B-001"));
        }
        let ids: Vec<JobId> = (0..3).filter_map(|_| rx.try_next_job()).map(|j| j.id).collect();
        assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
    }

    #[tokio::test]
    async fn dropped_listeners_are_pruned() {
        let dispatcher = JobDispatcher::new();
        let keep = dispatcher.subscribe();
        drop(dispatcher.subscribe());
        assert_eq!(dispatcher.listener_count(), 1);
        drop(keep);
        dispatcher.submit(JobKind::Report, json!({"title": "t", "content": "c"}));
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[tokio::test]
    async fn stream_ends_when_dispatchers_are_dropped() {
        let dispatcher = JobDispatcher::new();
        let mut rx = dispatcher.subscribe();
        let clone = dispatcher.clone();
        drop(dispatcher);
        clone.submit(JobKind::Report, json!({}));
        drop(clone);
        assert!(rx.next_job().await.is_some());
        assert!(rx.next_job().await.is_none());
    }
}
