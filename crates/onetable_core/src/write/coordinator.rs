//! Commit protocol: pending changes to store writes.

use super::assembler::DocumentAssembler;
use super::{WriteError, WriteResult};
use crate::config::TableConfig;
use crate::store::{StoreClient, TransactWriteRequest, WriteRequest};
use crate::tracking::{ChangeSet, ChangeTracker};
use log::{error, info};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// How a change set is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Chunked batch writes; partial application is possible.
    BestEffort,
    /// One conditional transaction; all or nothing.
    Atomic,
}

impl Display for CommitMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BestEffort => f.write_str("best_effort"),
            Self::Atomic => f.write_str("atomic"),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub mode: CommitMode,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Batch requests the store reported as not applied. Always empty for
    /// atomic commits.
    pub unprocessed: Vec<WriteRequest>,
}

impl CommitOutcome {
    fn empty(mode: CommitMode) -> Self {
        Self {
            mode,
            added: 0,
            modified: 0,
            deleted: 0,
            unprocessed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

/// Writes a tracker's pending changes and accepts them on success.
pub struct WriteCoordinator<'a> {
    store: &'a dyn StoreClient,
    config: &'a TableConfig,
}

impl<'a> WriteCoordinator<'a> {
    pub fn new(store: &'a dyn StoreClient, config: &'a TableConfig) -> Self {
        Self { store, config }
    }

    /// Writes every pending change in `mode`.
    ///
    /// The tracker accepts the changes only after the store call(s)
    /// succeeded; on error every entry stays pending.
    pub async fn commit(
        &self,
        tracker: &mut ChangeTracker,
        mode: CommitMode,
    ) -> WriteResult<CommitOutcome> {
        let changes = tracker.fetch_changes()?;
        if changes.is_empty() {
            return Ok(CommitOutcome::empty(mode));
        }

        info!(
            "event=commit module=write status=start mode={} added={} modified={} deleted={}",
            mode,
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
        let written = match mode {
            CommitMode::BestEffort => self.write_batches(&changes).await,
            CommitMode::Atomic => self.write_transaction(&changes).await.map(|()| Vec::new()),
        };
        let unprocessed = match written {
            Ok(unprocessed) => unprocessed,
            Err(err) => {
                error!(
                    "event=commit module=write status=error mode={} error={}",
                    mode, err
                );
                return Err(err);
            }
        };

        tracker.accept_changes()?;
        info!(
            "event=commit module=write status=ok mode={} added={} modified={} deleted={} unprocessed={}",
            mode,
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len(),
            unprocessed.len()
        );
        Ok(CommitOutcome {
            mode,
            added: changes.added.len(),
            modified: changes.modified.len(),
            deleted: changes.deleted.len(),
            unprocessed,
        })
    }

    async fn write_batches(&self, changes: &ChangeSet) -> WriteResult<Vec<WriteRequest>> {
        let assembler = DocumentAssembler::new(self.config);
        let requests = changes
            .added
            .iter()
            .chain(changes.modified.iter())
            .chain(changes.deleted.iter())
            .map(|change| assembler.write_request(change))
            .collect::<Result<Vec<_>, _>>()?;

        let mut unprocessed = Vec::new();
        for (position, chunk) in requests.chunks(self.config.max_batch_size).enumerate() {
            let output = self
                .store
                .batch_write(&self.config.table_name, chunk.to_vec())
                .await?;
            info!(
                "event=batch_write module=write status=ok chunk={} requests={} unprocessed={}",
                position,
                chunk.len(),
                output.unprocessed.len()
            );
            unprocessed.extend(output.unprocessed);
        }
        Ok(unprocessed)
    }

    async fn write_transaction(&self, changes: &ChangeSet) -> WriteResult<()> {
        let assembler = DocumentAssembler::new(self.config);
        let mut items = Vec::with_capacity(changes.len());
        for change in changes.iter() {
            if let Some(item) = assembler.transact_item(change)? {
                items.push(item);
            }
        }
        if items.len() > self.config.max_transaction_items {
            return Err(WriteError::TransactionTooLarge {
                items: items.len(),
                max: self.config.max_transaction_items,
            });
        }
        if items.is_empty() {
            return Ok(());
        }

        let request = TransactWriteRequest {
            client_request_token: Uuid::new_v4().to_string(),
            items,
        };
        let token = request.client_request_token.clone();
        let count = request.items.len();
        self.store.transact_write(request).await?;
        info!(
            "event=transact_write module=write status=ok items={} token={}",
            count, token
        );
        Ok(())
    }
}
