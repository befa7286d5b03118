use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Commit;
use crate::wal::Wal;

/// Durability seam. Selected once at startup: `WalJournal` for a durable
/// store, `MemJournal` for an ephemeral one. Call sites never branch on
/// which is in play.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Durably record one commit. Returning `Ok` means the commit survives
    /// a crash; the caller may then apply it to memory.
    async fn append(&self, commit: &Commit) -> io::Result<()>;

    /// Rewrite the log to the given minimal commit set.
    async fn compact(&self, commits: Vec<Commit>) -> io::Result<()>;

    async fn appends_since_compact(&self) -> u64;
}

// ── Group-commit WAL writer ──────────────────────────────────────

enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        commits: Vec<Commit>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => {
                            batch.push((commit, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Commit, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Commit, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (commit, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Commit, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { commits, response } => {
            let result = Wal::write_compact_file(wal.path(), &commits)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer shut down")
}

/// Durable journal backed by the group-commit WAL writer task.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Replay existing records, then open the WAL for appends and spawn the
    /// writer. Returns the replayed commits alongside the journal.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Commit>)> {
        let commits = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Ok((Self { tx }, commits))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, commit: &Commit) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append {
                commit: commit.clone(),
                response: tx,
            })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
    }

    async fn compact(&self, commits: Vec<Commit>) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact {
                commits,
                response: tx,
            })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Ephemeral journal: state lives only in memory. Appends succeed
/// immediately and nothing survives a restart.
pub struct MemJournal;

#[async_trait]
impl Journal for MemJournal {
    async fn append(&self, _commit: &Commit) -> io::Result<()> {
        Ok(())
    }

    async fn compact(&self, _commits: Vec<Commit>) -> io::Result<()> {
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Op, Slot};

    fn test_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("curbd_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn register(id: &str) -> Commit {
        Commit::one(Op::RegisterSlot {
            slot: Slot {
                slot_id: id.into(),
                cluster_id: "C_A1".into(),
                base_price: 30.0,
                dynamic_price: 30.0,
                is_ev: false,
                is_accessible: false,
            },
        })
    }

    #[tokio::test]
    async fn wal_journal_appends_and_replays() {
        let path = test_path("journal_roundtrip.wal");

        {
            let (journal, replayed) = WalJournal::open(&path).unwrap();
            assert!(replayed.is_empty());
            journal.append(&register("S101")).await.unwrap();
            journal.append(&register("S102")).await.unwrap();
            assert_eq!(journal.appends_since_compact().await, 2);
        }

        let (_journal, replayed) = WalJournal::open(&path).unwrap();
        assert_eq!(replayed.len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn mem_journal_is_a_noop() {
        let journal = MemJournal;
        journal.append(&register("S101")).await.unwrap();
        assert_eq!(journal.appends_since_compact().await, 0);
    }
}
