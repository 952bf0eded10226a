//! Ambient transaction spanning one or more units of work.
//!
//! # Responsibility
//! - Open a transaction on every participant, stage their changes in order
//!   and complete them all, or abort every enlisted participant.
//!
//! # Invariants
//! - A staging failure aborts every participant enlisted so far and
//!   disposes the one that failed; nothing is committed.
//! - Completion is best-effort across independent stores: when completing
//!   one participant fails, those completed before it stay committed and
//!   the rest are aborted.

use crate::repo::RepoResult;
use async_trait::async_trait;
use log::{error, info, warn};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One transactional resource taking part in a scope.
#[async_trait]
pub trait Participant: Send {
    fn label(&self) -> String;

    /// Opens the participant's transaction.
    fn enlist(&mut self) -> RepoResult<()>;

    /// Writes pending changes inside the open transaction.
    fn stage(&mut self, ensure_history: bool) -> RepoResult<usize>;

    async fn stage_async(
        &mut self,
        ensure_history: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<usize>;

    /// Makes staged changes durable.
    fn complete(&mut self) -> RepoResult<()>;

    /// Rolls back the open transaction, if any. Never fails.
    fn abort(&mut self);

    /// Called once on the participant whose staging failed.
    fn fail(&mut self);
}

pub struct TransactionScope {
    id: Uuid,
    ensure_history: bool,
    started_at: Instant,
}

impl TransactionScope {
    pub fn new(ensure_history: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            ensure_history,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stages and completes every participant in order; returns the total
    /// number of entity rows written.
    pub fn run(self, participants: &mut [&mut dyn Participant]) -> RepoResult<usize> {
        self.log_start(participants.len());
        let mut written = 0;
        for index in 0..participants.len() {
            let staged = participants[index]
                .enlist()
                .and_then(|()| participants[index].stage(self.ensure_history));
            match staged {
                Ok(count) => written += count,
                Err(err) => return Err(self.unwind(participants, index, err)),
            }
        }
        self.finish(participants, written)
    }

    pub async fn run_async(
        self,
        participants: &mut [&mut dyn Participant],
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        self.log_start(participants.len());
        let mut written = 0;
        for index in 0..participants.len() {
            if let Err(err) = participants[index].enlist() {
                return Err(self.unwind(participants, index, err));
            }
            match participants[index]
                .stage_async(self.ensure_history, cancel)
                .await
            {
                Ok(count) => written += count,
                Err(err) => return Err(self.unwind(participants, index, err)),
            }
        }
        self.finish(participants, written)
    }

    fn finish(
        self,
        participants: &mut [&mut dyn Participant],
        written: usize,
    ) -> RepoResult<usize> {
        for index in 0..participants.len() {
            if let Err(err) = participants[index].complete() {
                error!(
                    "event=scope_complete module=uow status=partial scope_id={} participant={} completed={} error={}",
                    self.id,
                    participants[index].label(),
                    index,
                    err
                );
                for participant in participants[index..].iter_mut() {
                    participant.abort();
                }
                participants[index].fail();
                return Err(err);
            }
        }
        info!(
            "event=scope_complete module=uow status=ok scope_id={} participants={} rows={} duration_ms={}",
            self.id,
            participants.len(),
            written,
            self.started_at.elapsed().as_millis()
        );
        Ok(written)
    }

    fn unwind(
        &self,
        participants: &mut [&mut dyn Participant],
        failed: usize,
        err: crate::repo::RepoError,
    ) -> crate::repo::RepoError {
        warn!(
            "event=scope_rollback module=uow status=error scope_id={} participant={} enlisted={} error={}",
            self.id,
            participants[failed].label(),
            failed + 1,
            err
        );
        for participant in participants[..=failed].iter_mut() {
            participant.abort();
        }
        participants[failed].fail();
        err
    }

    fn log_start(&self, participants: usize) {
        info!(
            "event=scope_begin module=uow status=start scope_id={} participants={} history={}",
            self.id, participants, self.ensure_history
        );
    }
}
