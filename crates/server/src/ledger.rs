//! Request ledger: pending and completed request maps, keyed by correlation
//! id, with age-based reaping. An id lives in at most one of the two maps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;

pub struct PendingRequest {
    pub code: String,
    pub created_at: Instant,
    /// Long-poll wait-handle; fired on completion and on reap.
    pub notify: Arc<Notify>,
}

#[derive(Debug, Clone)]
pub struct CompletedResult {
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub completed_at: Instant,
}

pub enum Lookup {
    Pending { notify: Arc<Notify>, age: Duration },
    Completed(CompletedResult),
    Unknown,
}

#[derive(Default)]
pub struct Ledger {
    pending: HashMap<String, PendingRequest>,
    completed: HashMap<String, CompletedResult>,
}

impl Ledger {
    pub fn insert(&mut self, id: &str, code: &str) {
        self.pending.insert(
            id.to_string(),
            PendingRequest {
                code: code.to_string(),
                created_at: Instant::now(),
                notify: Arc::new(Notify::new()),
            },
        );
    }

    /// Moves pending → completed and wakes the request's waiters. Returns
    /// false when the id is not pending (already resolved, reaped, or never
    /// submitted); the outcome is dropped in that case so the first result
    /// for an id wins.
    pub fn complete(&mut self, id: &str, outcome: CompletedResult) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        self.completed.insert(id.to_string(), outcome);
        pending.notify.notify_waiters();
        true
    }

    pub fn lookup(&self, id: &str) -> Lookup {
        if let Some(p) = self.pending.get(id) {
            return Lookup::Pending {
                notify: Arc::clone(&p.notify),
                age: p.created_at.elapsed(),
            };
        }
        if let Some(c) = self.completed.get(id) {
            return Lookup::Completed(c.clone());
        }
        Lookup::Unknown
    }

    /// Snapshot of outstanding payloads for replay to a newly connected tab.
    pub fn pending_payloads(&self) -> Vec<(String, String)> {
        self.pending
            .iter()
            .map(|(id, p)| (id.clone(), p.code.clone()))
            .collect()
    }

    pub fn reap(&mut self, max_age: Duration) -> usize {
        self.reap_at(Instant::now(), max_age)
    }

    /// Deletes entries strictly older than `max_age` as of `now`; entries at
    /// or below the threshold survive. Waiters of reaped pending entries are
    /// woken so abandoned long-polls return instead of leaking.
    pub(crate) fn reap_at(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.pending.len() + self.completed.len();
        self.pending.retain(|_, p| {
            let stale = now.saturating_duration_since(p.created_at) > max_age;
            if stale {
                p.notify.notify_waiters();
            }
            !stale
        });
        self.completed
            .retain(|_, c| now.saturating_duration_since(c.completed_at) <= max_age);
        before - self.pending.len() - self.completed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }
}
