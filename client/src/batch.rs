//! Batch persistence orchestration.
//!
//! The coordinator drives the whole persistence cycle: validate, plan,
//! stage newborn orphans, send the family envelope, merge server results,
//! reset ledgers. All validation and planning happens before the first
//! transport call; a failure at any later point leaves every untouched
//! record's ledger intact, so retrying a failed save resends an identical
//! operation set.

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::handle::SequenceHandle;
use crate::transport::{
    decode_batch_response, envelope, SubOutcome, SubRequest, Transport, TransportError,
};
use crate::wire;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tether_engine::{graph, Context, Operation, Record};
use tracing::{debug, trace, warn};

/// Per-class persistence strategy.
///
/// Record kinds with special behavior compose a strategy object instead
/// of subclassing anything; the coordinator consults the strategy
/// registered for a record's class at each hook point.
pub trait Persistable: Send + Sync {
    /// Runs for every record in a save plan before any network call; an
    /// error aborts the save with zero transport activity.
    fn validate_before_saving(&self, record: &Record) -> Result<()> {
        let _ = record;
        Ok(())
    }

    /// Override the sub-request emitted for one operation table of this
    /// class. Return `None` for the default request shape.
    fn preferred_batch_request(
        &self,
        record: &Record,
        table: &BTreeMap<String, Operation>,
    ) -> Result<Option<SubRequest>> {
        let _ = (record, table);
        Ok(None)
    }

    /// Runs after the record's save fully succeeded and its ledger was
    /// reset.
    fn object_did_save(&self, record: &Record) {
        let _ = record;
    }
}

/// Orchestrates batch save, delete, and fetch over a [`Transport`].
pub struct BatchCoordinator {
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    strategies: HashMap<String, Arc<dyn Persistable>>,
}

impl BatchCoordinator {
    /// Create a coordinator with the default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, CoordinatorConfig::default())
    }

    /// Create a coordinator with explicit configuration.
    pub fn with_config(transport: Arc<dyn Transport>, config: CoordinatorConfig) -> Self {
        Self {
            transport,
            config,
            strategies: HashMap::new(),
        }
    }

    /// Register a persistence strategy for a record class.
    pub fn with_strategy(
        mut self,
        class: impl Into<String>,
        strategy: Arc<dyn Persistable>,
    ) -> Self {
        self.strategies.insert(class.into(), strategy);
        self
    }

    fn strategy(&self, class: &str) -> Option<&Arc<dyn Persistable>> {
        self.strategies.get(class)
    }

    /// Persist a record graph. See [`save_with_handle`](Self::save_with_handle).
    pub async fn save(&self, records: &[Record]) -> Result<()> {
        self.save_with_handle(records, &SequenceHandle::new()).await
    }

    /// Persist a record graph under a cancelable handle.
    ///
    /// The family of the given roots is computed, newborn orphans are
    /// persisted in independent prior batches (deepest first), and the
    /// remaining records go out as one dependency-ordered envelope. A
    /// stage failure aborts the whole save reporting that stage's error;
    /// records persisted by earlier stages stay persisted.
    pub async fn save_with_handle(
        &self,
        records: &[Record],
        handle: &SequenceHandle,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let ctx = Context::shared(records)?;
        let plan = graph::plan(records)?;

        for record in plan.all_records() {
            if let Some(strategy) = self.strategy(record.class()) {
                strategy.validate_before_saving(record)?;
            }
        }

        debug!(
            stages = plan.stages.len(),
            family = plan.family.len(),
            "computed save plan"
        );

        for (index, stage) in plan.stages.iter().enumerate() {
            trace!(stage = index, records = stage.len(), "persisting orphan stage");
            if let Err(err) = self.run_save_batch(&ctx, stage, handle).await {
                warn!(stage = index, %err, "orphan stage failed, aborting save");
                return Err(err);
            }
        }

        self.run_save_batch(&ctx, &plan.family, handle).await
    }

    /// Delete records. See [`delete_with_handle`](Self::delete_with_handle).
    pub async fn delete(&self, records: &[Record]) -> Result<()> {
        self.delete_with_handle(records, &SequenceHandle::new())
            .await
    }

    /// Delete records under a cancelable handle.
    ///
    /// Records without an identity are no-ops. On success every deleted
    /// record carries a tombstone and an empty ledger.
    pub async fn delete_with_handle(
        &self,
        records: &[Record],
        handle: &SequenceHandle,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        Context::shared(records)?;

        let targets: Vec<&Record> = records
            .iter()
            .filter(|record| record.identity().is_some())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        debug!(records = targets.len(), "deleting records");

        let pieces: Vec<(usize, SubRequest, String)> = targets
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let identity = record.identity().unwrap_or_default();
                let sub = SubRequest::new(
                    "DELETE",
                    format!(
                        "{}/{}/{}",
                        self.config.classes_path,
                        record.class(),
                        identity
                    ),
                    Json::Null,
                );
                (index, sub, identity)
            })
            .collect();

        self.run_envelopes(&pieces, handle).await?;

        for record in targets {
            record.mark_deleted();
        }
        Ok(())
    }

    /// Fetch records. See [`fetch_with_handle`](Self::fetch_with_handle).
    pub async fn fetch(&self, records: &[Record]) -> Result<()> {
        self.fetch_with_handle(records, &SequenceHandle::new())
            .await
    }

    /// Refresh records from the server under a cancelable handle.
    ///
    /// Every record must already have an identity; otherwise the call
    /// fails with `NotFound` before any network activity. On success each
    /// record's base field table is replaced with the server state and
    /// its pending operation stack is replayed on top.
    pub async fn fetch_with_handle(
        &self,
        records: &[Record],
        handle: &SequenceHandle,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let ctx = Context::shared(records)?;

        let mut pieces: Vec<(usize, SubRequest, String)> = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let identity = record.identity().ok_or_else(|| {
                tether_engine::Error::NotFound(format!(
                    "record '{}/{}' has no identity to fetch",
                    record.class(),
                    record.local_id()
                ))
            })?;
            let sub = SubRequest::new(
                "GET",
                format!(
                    "{}/{}/{}",
                    self.config.classes_path,
                    record.class(),
                    identity
                ),
                Json::Null,
            );
            pieces.push((index, sub, identity));
        }

        debug!(records = pieces.len(), "fetching records");

        let outcomes = self.run_envelopes(&pieces, handle).await?;
        for (index, payload) in outcomes {
            let delta = wire::decode_delta(&payload, &ctx);
            records[index].replace_base(delta.fields, delta.created_at, delta.updated_at);
        }
        Ok(())
    }

    /// Send one batch call worth of save sub-requests and apply the
    /// results. Results are only applied when every sub-request succeeded,
    /// so a failed call leaves all ledgers untouched.
    async fn run_save_batch(
        &self,
        ctx: &Context,
        records: &[Record],
        handle: &SequenceHandle,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut pieces: Vec<(usize, SubRequest, String)> = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let mut tables = record.operation_tables();
            if tables.is_empty() {
                if record.is_newborn() {
                    // A newborn with no mutations still needs its create.
                    tables.push(BTreeMap::new());
                } else {
                    continue;
                }
            }

            let newborn = record.is_newborn();
            let key = record
                .identity()
                .unwrap_or_else(|| record.local_id().to_string());

            for (position, table) in tables.iter().enumerate() {
                let preferred = self
                    .strategy(record.class())
                    .map(|s| s.preferred_batch_request(record, table))
                    .transpose()?
                    .flatten();
                let sub = match preferred {
                    Some(sub) => sub,
                    None => self.save_request(ctx, record, table, newborn && position == 0)?,
                };
                pieces.push((index, sub, key.clone()));
            }
        }

        let outcomes = self.run_envelopes(&pieces, handle).await?;

        for (index, payload) in outcomes {
            let delta = wire::decode_delta(&payload, ctx);
            records[index].merge_delta(delta);
        }
        for record in records {
            record.clear_pending();
            if let Some(strategy) = self.strategy(record.class()) {
                strategy.object_did_save(record);
            }
        }
        Ok(())
    }

    fn save_request(
        &self,
        ctx: &Context,
        record: &Record,
        table: &BTreeMap<String, Operation>,
        create: bool,
    ) -> Result<SubRequest> {
        let body = wire::encode_table(table, ctx)?;
        if create {
            Ok(SubRequest::new(
                "POST",
                format!("{}/{}", self.config.classes_path, record.class()),
                body,
            ))
        } else {
            let key = record
                .identity()
                .unwrap_or_else(|| record.local_id().to_string());
            Ok(SubRequest::new(
                "PUT",
                format!("{}/{}/{}", self.config.classes_path, record.class(), key),
                body,
            ))
        }
    }

    /// Chunk sub-requests at the configured envelope limit and send the
    /// chunks sequentially under the sequence handle. Returns every
    /// successful payload with its piece index, or the first failure.
    async fn run_envelopes(
        &self,
        pieces: &[(usize, SubRequest, String)],
        handle: &SequenceHandle,
    ) -> Result<Vec<(usize, Json)>> {
        let mut outcomes = Vec::with_capacity(pieces.len());

        for chunk in pieces.chunks(self.config.batch_limit) {
            let stage = handle.begin_stage()?;
            let subs: Vec<SubRequest> = chunk.iter().map(|(_, sub, _)| sub.clone()).collect();
            let keys: Vec<String> = chunk.iter().map(|(_, _, key)| key.clone()).collect();

            let transport = Arc::clone(&self.transport);
            let path = self.config.batch_path.clone();
            let body = envelope(&subs);
            trace!(sub_requests = subs.len(), "sending batch envelope");

            let response = stage
                .guard(async move { transport.send("POST", &path, body).await.map_err(Error::from) })
                .await?;

            let decoded = decode_batch_response(&response, &keys)?;
            for ((index, _, _), outcome) in chunk.iter().zip(decoded) {
                match outcome {
                    SubOutcome::Success(payload) => outcomes.push((*index, payload)),
                    SubOutcome::Failure(message) => {
                        return Err(Error::TransportFailure(TransportError::new(message)));
                    }
                }
            }
        }
        Ok(outcomes)
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("config", &self.config)
            .field("strategies", &self.strategies.keys())
            .finish()
    }
}
