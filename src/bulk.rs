//! Bulk writes: mixed write operations executed as one batch.
//!
//! Ordered batches run one operation at a time and stop at the first failure.
//! Unordered batches run every operation with at most `concurrency` requests
//! in flight and report all failures together. Either way the outcome is
//! folded in operation order, so results never depend on completion order.

use crate::collection::{DeleteResult, InsertManyResult, UpdateResult};
use crate::error::{DataApiError, Result};
use async_trait::async_trait;
use bson::{Bson, Document};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default number of operations in flight for unordered bulk writes.
pub const DEFAULT_BULK_WRITE_CONCURRENCY: usize = 10;

/// Insert a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOne {
    /// The document.
    pub document: Document,
    /// Vector to store as the document's `$vector`.
    pub vector: Option<Vec<f64>>,
}

impl InsertOne {
    /// Create the operation.
    pub fn new(document: Document) -> Self {
        Self {
            document,
            vector: None,
        }
    }

    /// Attach a vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// Insert several documents.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertMany {
    /// The documents.
    pub documents: Vec<Document>,
    /// One optional vector per document.
    pub vectors: Option<Vec<Option<Vec<f64>>>>,
    /// Stop at the first failed document.
    pub ordered: bool,
}

impl InsertMany {
    /// Create the operation (ordered by default).
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            vectors: None,
            ordered: true,
        }
    }

    /// Attach one optional vector per document.
    pub fn vectors(mut self, vectors: Vec<Option<Vec<f64>>>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    /// Set whether the insertion is ordered.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }
}

/// Update the first matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOne {
    /// Filter selecting the document.
    pub filter: Document,
    /// Update operators.
    pub update: Document,
    /// Pick the most similar match to this vector.
    pub vector: Option<Vec<f64>>,
    /// Insert when nothing matches.
    pub upsert: bool,
}

impl UpdateOne {
    /// Create the operation.
    pub fn new(filter: Document, update: Document) -> Self {
        Self {
            filter,
            update,
            vector: None,
            upsert: false,
        }
    }

    /// Attach a vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Set upsert.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

/// Update every matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMany {
    /// Filter selecting the documents.
    pub filter: Document,
    /// Update operators.
    pub update: Document,
    /// Insert when nothing matches.
    pub upsert: bool,
}

impl UpdateMany {
    /// Create the operation.
    pub fn new(filter: Document, update: Document) -> Self {
        Self {
            filter,
            update,
            upsert: false,
        }
    }

    /// Set upsert.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

/// Replace the first matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOne {
    /// Filter selecting the document.
    pub filter: Document,
    /// The new document.
    pub replacement: Document,
    /// Pick the most similar match to this vector.
    pub vector: Option<Vec<f64>>,
    /// Insert when nothing matches.
    pub upsert: bool,
}

impl ReplaceOne {
    /// Create the operation.
    pub fn new(filter: Document, replacement: Document) -> Self {
        Self {
            filter,
            replacement,
            vector: None,
            upsert: false,
        }
    }

    /// Attach a vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Set upsert.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

/// Delete the first matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOne {
    /// Filter selecting the document.
    pub filter: Document,
    /// Pick the most similar match to this vector.
    pub vector: Option<Vec<f64>>,
}

impl DeleteOne {
    /// Create the operation.
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            vector: None,
        }
    }

    /// Attach a vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// Delete every matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMany {
    /// Filter selecting the documents; must not be empty.
    pub filter: Document,
}

impl DeleteMany {
    /// Create the operation.
    pub fn new(filter: Document) -> Self {
        Self { filter }
    }
}

/// One write in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// See [`InsertOne`].
    InsertOne(InsertOne),
    /// See [`InsertMany`].
    InsertMany(InsertMany),
    /// See [`UpdateOne`].
    UpdateOne(UpdateOne),
    /// See [`UpdateMany`].
    UpdateMany(UpdateMany),
    /// See [`ReplaceOne`].
    ReplaceOne(ReplaceOne),
    /// See [`DeleteOne`].
    DeleteOne(DeleteOne),
    /// See [`DeleteMany`].
    DeleteMany(DeleteMany),
}

macro_rules! impl_from_operation {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for WriteOperation {
                fn from(op: $variant) -> Self {
                    WriteOperation::$variant(op)
                }
            }
        )*
    };
}

impl_from_operation!(InsertOne, InsertMany, UpdateOne, UpdateMany, ReplaceOne, DeleteOne, DeleteMany);

impl WriteOperation {
    /// API command name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            WriteOperation::InsertOne(_) => "insertOne",
            WriteOperation::InsertMany(_) => "insertMany",
            WriteOperation::UpdateOne(_) => "updateOne",
            WriteOperation::UpdateMany(_) => "updateMany",
            WriteOperation::ReplaceOne(_) => "replaceOne",
            WriteOperation::DeleteOne(_) => "deleteOne",
            WriteOperation::DeleteMany(_) => "deleteMany",
        }
    }

    /// Check the operation for conflicting input.
    pub fn validate(&self) -> Result<()> {
        match self {
            WriteOperation::InsertOne(op) => op.validate(),
            WriteOperation::InsertMany(op) => op.validate(),
            WriteOperation::UpdateOne(op) => check_vector(op.vector.as_deref()),
            WriteOperation::ReplaceOne(op) => check_vector(op.vector.as_deref()),
            WriteOperation::DeleteOne(op) => check_vector(op.vector.as_deref()),
            WriteOperation::UpdateMany(_) => Ok(()),
            WriteOperation::DeleteMany(op) => op.validate(),
        }
    }
}

impl InsertOne {
    pub(crate) fn validate(&self) -> Result<()> {
        check_document_vector(&self.document, self.vector.as_deref())
    }
}

impl InsertMany {
    pub(crate) fn validate(&self) -> Result<()> {
        let Some(vectors) = &self.vectors else {
            return Ok(());
        };
        if vectors.len() != self.documents.len() {
            return Err(DataApiError::invalid_argument(format!(
                "{} vectors supplied for {} documents",
                vectors.len(),
                self.documents.len()
            )));
        }
        for (document, vector) in self.documents.iter().zip(vectors) {
            check_document_vector(document, vector.as_deref())?;
        }
        Ok(())
    }
}

impl DeleteMany {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.filter.is_empty() {
            return Err(DataApiError::invalid_argument(
                "deleteMany with an empty filter would delete everything; use delete_all",
            ));
        }
        Ok(())
    }
}

pub(crate) fn check_vector(vector: Option<&[f64]>) -> Result<()> {
    match vector {
        Some([]) => Err(DataApiError::invalid_argument("vector cannot be empty")),
        _ => Ok(()),
    }
}

fn check_document_vector(document: &Document, vector: Option<&[f64]>) -> Result<()> {
    check_vector(vector)?;
    if vector.is_some() && document.contains_key("$vector") {
        return Err(DataApiError::invalid_argument(
            "vector given both as an argument and as the document's $vector",
        ));
    }
    Ok(())
}

/// Result of one dispatched write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Ids of the inserted documents.
    Inserted(InsertManyResult),
    /// Update or replace counts.
    Updated(UpdateResult),
    /// Delete count.
    Deleted(DeleteResult),
}

/// Sends single write operations to the server.
#[async_trait]
pub trait WriteDispatcher: Send + Sync {
    /// Run one operation.
    async fn dispatch(&self, operation: &WriteOperation) -> Result<WriteOutcome>;
}

/// Consolidated result of a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    /// Documents inserted by insert operations.
    pub inserted_count: u64,
    /// Documents matched by update and replace operations.
    pub matched_count: u64,
    /// Documents modified by update and replace operations.
    pub modified_count: u64,
    /// Documents deleted.
    pub deleted_count: u64,
    /// Operations that upserted a document.
    pub upserted_count: u64,
    /// Upserted ids by operation position.
    pub upserted_ids: BTreeMap<usize, Bson>,
    /// Raw outcome of every successful operation by position.
    pub operation_results: BTreeMap<usize, WriteOutcome>,
}

impl BulkWriteResult {
    fn absorb(&mut self, position: usize, outcome: WriteOutcome) {
        match &outcome {
            WriteOutcome::Inserted(result) => {
                self.inserted_count += result.inserted_ids.len() as u64;
            }
            WriteOutcome::Updated(result) => {
                self.matched_count += result.matched_count;
                self.modified_count += result.modified_count;
                if let Some(id) = &result.upserted_id {
                    self.upserted_count += 1;
                    self.upserted_ids.insert(position, id.clone());
                }
            }
            WriteOutcome::Deleted(result) => {
                self.deleted_count += result.deleted_count;
            }
        }
        self.operation_results.insert(position, outcome);
    }
}

/// A failed operation of a bulk write.
#[derive(Debug)]
pub struct OperationFailure {
    /// Position of the operation in the submitted list.
    pub position: usize,
    /// Why it failed.
    pub error: DataApiError,
}

/// Partial outcome of a bulk write in which some operations failed.
#[derive(Debug)]
pub struct BulkWriteError {
    /// Aggregate of the operations that succeeded.
    pub partial_result: BulkWriteResult,
    /// Failed operations in position order.
    pub failures: Vec<OperationFailure>,
}

impl BulkWriteError {
    /// Positions of the failed operations.
    pub fn failed_positions(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.position).collect()
    }

    /// Positions of the operations that succeeded.
    pub fn succeeded_positions(&self) -> Vec<usize> {
        self.partial_result.operation_results.keys().copied().collect()
    }
}

/// Options for bulk writes.
#[derive(Debug, Clone)]
pub struct BulkWriteOptions {
    /// Run operations one at a time and stop at the first failure.
    pub ordered: bool,
    /// Operations in flight at once (unordered only).
    pub concurrency: Option<usize>,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            concurrency: None,
        }
    }
}

impl BulkWriteOptions {
    /// Create a builder.
    pub fn builder() -> BulkWriteOptionsBuilder {
        BulkWriteOptionsBuilder::default()
    }
}

/// Builder for BulkWriteOptions.
#[derive(Debug, Clone, Default)]
pub struct BulkWriteOptionsBuilder {
    options: BulkWriteOptions,
}

impl BulkWriteOptionsBuilder {
    /// Set ordered execution.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.options.ordered = ordered;
        self
    }

    /// Set the concurrency.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.options.concurrency = Some(concurrency);
        self
    }

    /// Build the options.
    pub fn build(self) -> BulkWriteOptions {
        self.options
    }
}

/// Outcomes collected while a batch runs, keyed by position.
#[derive(Default)]
pub(crate) struct Accumulator {
    outcomes: BTreeMap<usize, WriteOutcome>,
    failures: BTreeMap<usize, DataApiError>,
}

impl Accumulator {
    pub(crate) fn record(&mut self, position: usize, outcome: Result<WriteOutcome>) {
        match outcome {
            Ok(outcome) => {
                self.outcomes.insert(position, outcome);
            }
            Err(error) => {
                self.failures.insert(position, error);
            }
        }
    }

    pub(crate) fn finish(self) -> Result<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        for (position, outcome) in self.outcomes {
            result.absorb(position, outcome);
        }
        if self.failures.is_empty() {
            return Ok(result);
        }
        let failures = self
            .failures
            .into_iter()
            .map(|(position, error)| OperationFailure { position, error })
            .collect();
        Err(BulkWriteError {
            partial_result: result,
            failures,
        }
        .into())
    }
}

/// Runs bulk writes through a [`WriteDispatcher`].
pub struct BulkExecutor {
    dispatcher: Arc<dyn WriteDispatcher>,
    default_concurrency: usize,
}

impl BulkExecutor {
    /// Create an executor.
    pub fn new(dispatcher: Arc<dyn WriteDispatcher>) -> Self {
        Self {
            dispatcher,
            default_concurrency: DEFAULT_BULK_WRITE_CONCURRENCY,
        }
    }

    /// Set the concurrency used when the options do not name one.
    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = concurrency;
        self
    }

    /// Run `operations` as one batch.
    pub async fn execute(
        &self,
        operations: Vec<WriteOperation>,
        options: BulkWriteOptions,
    ) -> Result<BulkWriteResult> {
        self.execute_with_cancellation(operations, options, CancellationToken::new())
            .await
    }

    /// Run `operations` as one batch, skipping whatever has not started when
    /// `cancel` fires.
    ///
    /// Skipped operations are reported as failures with
    /// [`DataApiError::Cancelled`]; requests already sent run to completion.
    #[instrument(skip_all, fields(operations = operations.len(), ordered = options.ordered))]
    pub async fn execute_with_cancellation(
        &self,
        operations: Vec<WriteOperation>,
        options: BulkWriteOptions,
        cancel: CancellationToken,
    ) -> Result<BulkWriteResult> {
        let concurrency = match (options.ordered, options.concurrency) {
            (_, Some(0)) => {
                return Err(DataApiError::invalid_argument("concurrency must be positive"))
            }
            (true, Some(n)) if n > 1 => {
                return Err(DataApiError::invalid_argument(
                    "an ordered bulk write cannot run concurrently",
                ))
            }
            (true, _) => 1,
            (false, requested) => requested.unwrap_or(self.default_concurrency).max(1),
        };
        for operation in &operations {
            operation.validate()?;
        }

        let accumulator = if options.ordered {
            self.run_ordered(operations, &cancel).await
        } else {
            self.run_unordered(operations, concurrency, cancel).await?
        };
        accumulator.finish()
    }

    async fn run_ordered(
        &self,
        operations: Vec<WriteOperation>,
        cancel: &CancellationToken,
    ) -> Accumulator {
        let mut accumulator = Accumulator::default();
        for (position, operation) in operations.iter().enumerate() {
            if cancel.is_cancelled() {
                accumulator.record(position, Err(DataApiError::Cancelled));
                break;
            }
            let outcome = dispatch_one(self.dispatcher.as_ref(), position, operation).await;
            let failed = outcome.is_err();
            accumulator.record(position, outcome);
            if failed {
                break;
            }
        }
        accumulator
    }

    async fn run_unordered(
        &self,
        operations: Vec<WriteOperation>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<Accumulator> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let accumulator = Arc::new(Mutex::new(Accumulator::default()));
        let mut tasks = JoinSet::new();

        for (position, operation) in operations.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let dispatcher = Arc::clone(&self.dispatcher);
            let accumulator = Arc::clone(&accumulator);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let outcome = match permit {
                    // the permit is held until the dispatch completes
                    Some(_permit) => dispatch_one(dispatcher.as_ref(), position, &operation).await,
                    None => Err(DataApiError::Cancelled),
                };
                accumulator.lock().await.record(position, outcome);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| DataApiError::Internal(format!("bulk write task failed: {e}")))?;
        }

        let mut guard = accumulator.lock().await;
        Ok(std::mem::take(&mut *guard))
    }
}

async fn dispatch_one(
    dispatcher: &dyn WriteDispatcher,
    position: usize,
    operation: &WriteOperation,
) -> Result<WriteOutcome> {
    debug!(position, operation = operation.name(), "dispatching bulk operation");
    let outcome = dispatcher.dispatch(operation).await;
    if let Err(err) = &outcome {
        warn!(position, operation = operation.name(), error = %err, "bulk operation failed");
    }
    outcome
}
