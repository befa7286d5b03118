mod booking;
mod error;
mod forecast;
mod incentives;
mod outbox;
mod pricing;
mod queries;
mod sessions;
mod store;

pub use error::EngineError;
pub use forecast::{nearest_in_window, upcoming_within};
pub use outbox::{BroadcastPublisher, Publisher};
pub use store::Store;

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::journal::{Journal, MemJournal, WalJournal};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;

/// The reservation engine and its periodic collaborators, sharing one store.
///
/// Mutations journal exactly one `Commit` and apply it to memory only after
/// the append succeeds — a failed append leaves zero partial state.
pub struct Engine {
    pub(crate) store: Store,
    journal: Arc<dyn Journal>,
    pub notify: Arc<NotifyHub>,
    config: Config,
}

impl Engine {
    /// Durable engine: replay the WAL at `path`, then journal all appends.
    pub fn open(path: &Path, notify: Arc<NotifyHub>, config: Config) -> io::Result<Self> {
        let (journal, commits) = WalJournal::open(path)?;
        let engine = Self {
            store: Store::new(),
            journal: Arc::new(journal),
            notify,
            config,
        };
        for commit in &commits {
            engine.store.apply_commit(commit);
        }
        Ok(engine)
    }

    /// Ephemeral engine: in-memory only, nothing survives a restart.
    pub fn ephemeral(notify: Arc<NotifyHub>, config: Config) -> Self {
        Self {
            store: Store::new(),
            journal: Arc::new(MemJournal),
            notify,
            config,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_journal(
        journal: Arc<dyn Journal>,
        notify: Arc<NotifyHub>,
        config: Config,
    ) -> Self {
        Self {
            store: Store::new(),
            journal,
            notify,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Durably record one commit. The caller applies it to memory afterwards,
    /// under whatever row locks it already holds.
    pub(crate) async fn persist(&self, commit: &Commit) -> Result<(), EngineError> {
        self.journal
            .append(commit)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))
    }

    // ── Inventory ────────────────────────────────────────────

    pub async fn register_slot(&self, slot: Slot) -> Result<(), EngineError> {
        if slot.slot_id.len() > MAX_SLOT_ID_LEN {
            return Err(EngineError::LimitExceeded("slot id too long"));
        }
        if slot.cluster_id.len() > MAX_CLUSTER_ID_LEN {
            return Err(EngineError::LimitExceeded("cluster id too long"));
        }
        if self.store.slots.len() >= MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if self.store.slots.contains_key(&slot.slot_id) {
            // Idempotent: re-registering an existing slot is a no-op, so an
            // inventory reload never duplicates cluster membership.
            return Ok(());
        }
        let commit = Commit::one(Op::RegisterSlot { slot: slot.clone() });
        self.persist(&commit).await?;
        self.store.insert_slot(slot);
        Ok(())
    }

    /// Load a JSON inventory file (array of slots). Existing slots are left
    /// untouched. Returns the number of newly registered slots.
    pub async fn load_inventory(&self, path: &Path) -> Result<usize, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::StoreError(format!("inventory read: {e}")))?;
        let slots: Vec<Slot> = serde_json::from_str(&raw)
            .map_err(|e| EngineError::StoreError(format!("inventory parse: {e}")))?;
        let mut added = 0;
        for slot in slots {
            if self.store.slots.contains_key(&slot.slot_id) {
                continue;
            }
            self.register_slot(slot).await?;
            added += 1;
        }
        Ok(added)
    }

    // ── Journal maintenance ──────────────────────────────────

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    /// Rewrite the journal with the minimal commit set that recreates the
    /// current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let snapshot = self.snapshot().await;
        self.journal
            .compact(snapshot)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))
    }

    async fn snapshot(&self) -> Vec<Commit> {
        let mut commits = Vec::new();

        for id in self.store.slot_ids() {
            if let Some(slot) = self.store.get_slot(&id) {
                let slot = slot.read().await.clone();
                commits.push(Commit::one(Op::RegisterSlot { slot }));
            }
        }

        // Clone the Arcs out before awaiting so no shard guard is held
        // across an await point.
        let series_list: Vec<_> = self
            .store
            .predictions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut points = Vec::new();
        for series in series_list {
            points.extend(series.read().await.points.iter().cloned());
        }
        if !points.is_empty() {
            commits.push(Commit::one(Op::UpsertPredictions { points }));
        }

        for id in self.store.booking_ids() {
            if let Some(b) = self.store.get_booking(&id) {
                let booking = b.read().await.clone();
                let candidates = self.store.candidates_for(&id);
                commits.push(Commit {
                    ops: vec![
                        Op::InsertBooking { booking },
                        Op::AddCandidates {
                            booking_id: id,
                            candidates,
                        },
                    ],
                });
            }
        }

        let outbox = self.store.outbox.read().await;
        if !outbox.is_empty() {
            commits.push(Commit {
                ops: outbox
                    .iter()
                    .map(|e| Op::AppendOutbox { event: e.clone() })
                    .collect(),
            });
        }
        drop(outbox);

        let alerts = self.store.alerts.read().await;
        if !alerts.is_empty() {
            commits.push(Commit {
                ops: alerts
                    .iter()
                    .map(|a| Op::RaiseAlert { alert: a.clone() })
                    .collect(),
            });
        }
        drop(alerts);

        let sessions: Vec<_> = self
            .store
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut session_ops = Vec::new();
        for session in sessions {
            let session = session.read().await.clone();
            session_ops.push(Op::InsertSession { session });
        }
        if !session_ops.is_empty() {
            commits.push(Commit { ops: session_ops });
        }

        let payments: Vec<_> = self
            .store
            .payments
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut payment_ops = Vec::new();
        for payment in payments {
            let payment = payment.read().await.clone();
            payment_ops.push(Op::InsertPayment { payment });
        }
        if !payment_ops.is_empty() {
            commits.push(Commit { ops: payment_ops });
        }

        commits
    }
}
