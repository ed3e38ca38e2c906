//! Collection struct with CRUD, vector search and bulk operations.

use crate::bulk::{
    check_vector, Accumulator, BulkExecutor, BulkWriteOptions, BulkWriteResult, DeleteMany, DeleteOne,
    InsertMany, InsertOne, ReplaceOne, UpdateMany, UpdateOne, WriteDispatcher, WriteOperation,
    WriteOutcome,
};
use crate::client::Connection;
use crate::convert::{document_to_json, json_to_bson, json_to_document, vector_to_json};
use crate::cursor::{decode, Cursor, Page, PageFetcher};
use crate::error::{DataApiError, Result};
use crate::path::FieldPath;
use crate::query::{validate_projection, validate_sort, FindOptions, FindQuery};
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of an insert_one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The ID of the inserted document.
    pub inserted_id: Bson,
}

/// Result of an insert_many operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    /// IDs of the inserted documents, in insertion order.
    pub inserted_ids: Vec<Bson>,
}

/// Result of an update or replace operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Number of documents matched.
    pub matched_count: u64,
    /// Number of documents modified.
    pub modified_count: u64,
    /// The ID of the upserted document, if any.
    pub upserted_id: Option<Bson>,
}

/// Result of a delete operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    /// Number of documents deleted.
    pub deleted_count: u64,
}

/// Options for update and replace operations.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Whether to insert if no documents match.
    pub upsert: Option<bool>,
    /// Act on the match most similar to this vector (single-document
    /// operations only).
    pub vector: Option<Vec<f64>>,
}

impl UpdateOptions {
    /// Create a builder.
    pub fn builder() -> UpdateOptionsBuilder {
        UpdateOptionsBuilder::default()
    }
}

/// Builder for UpdateOptions.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptionsBuilder {
    options: UpdateOptions,
}

impl UpdateOptionsBuilder {
    /// Set upsert option.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.options.upsert = Some(upsert);
        self
    }

    /// Set the similarity vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.options.vector = Some(vector);
        self
    }

    /// Build the options.
    pub fn build(self) -> UpdateOptions {
        self.options
    }
}

/// Options for insert_many operations.
#[derive(Debug, Clone, Default)]
pub struct InsertManyOptions {
    /// Stop at the first failure (default true).
    pub ordered: Option<bool>,
    /// One optional vector per document.
    pub vectors: Option<Vec<Option<Vec<f64>>>>,
}

impl InsertManyOptions {
    /// Create a builder.
    pub fn builder() -> InsertManyOptionsBuilder {
        InsertManyOptionsBuilder::default()
    }
}

/// Builder for InsertManyOptions.
#[derive(Debug, Clone, Default)]
pub struct InsertManyOptionsBuilder {
    options: InsertManyOptions,
}

impl InsertManyOptionsBuilder {
    /// Set ordered insertion.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.options.ordered = Some(ordered);
        self
    }

    /// Set the per-document vectors.
    pub fn vectors(mut self, vectors: Vec<Option<Vec<f64>>>) -> Self {
        self.options.vectors = Some(vectors);
        self
    }

    /// Build the options.
    pub fn build(self) -> InsertManyOptions {
        self.options
    }
}

/// Which version of a document a find-and-modify operation returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the write.
    #[default]
    Before,
    /// The document as written.
    After,
}

impl ReturnDocument {
    fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Options for `find_one_and_replace`, `find_one_and_update` and
/// `find_one_and_delete`.
#[derive(Debug, Clone, Default)]
pub struct FindOneAndModifyOptions {
    /// Pick the first match in this order.
    pub sort: Option<Document>,
    /// Pick the match most similar to this vector.
    pub vector: Option<Vec<f64>>,
    /// Fields of the returned document.
    pub projection: Option<Document>,
    /// Insert if nothing matches. Not accepted by `find_one_and_delete`.
    pub upsert: Option<bool>,
    /// Version to return. Not accepted by `find_one_and_delete`.
    pub return_document: Option<ReturnDocument>,
}

impl FindOneAndModifyOptions {
    /// Create a builder.
    pub fn builder() -> FindOneAndModifyOptionsBuilder {
        FindOneAndModifyOptionsBuilder::default()
    }

    fn validate(&self) -> Result<()> {
        if self.vector.is_some() && self.sort.is_some() {
            return Err(DataApiError::invalid_argument(
                "a vector search cannot be combined with an explicit sort",
            ));
        }
        check_vector(self.vector.as_deref())?;
        if let Some(sort) = &self.sort {
            validate_sort(sort)?;
        }
        if let Some(projection) = &self.projection {
            validate_projection(projection)?;
        }
        Ok(())
    }
}

/// Builder for FindOneAndModifyOptions.
#[derive(Debug, Clone, Default)]
pub struct FindOneAndModifyOptionsBuilder {
    options: FindOneAndModifyOptions,
}

impl FindOneAndModifyOptionsBuilder {
    /// Set the sort order.
    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the similarity vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.options.vector = Some(vector);
        self
    }

    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Set upsert option.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.options.upsert = Some(upsert);
        self
    }

    /// Set which version of the document is returned.
    pub fn return_document(mut self, return_document: ReturnDocument) -> Self {
        self.options.return_document = Some(return_document);
        self
    }

    /// Build the options.
    pub fn build(self) -> FindOneAndModifyOptions {
        self.options
    }
}

/// Untyped command endpoint of one collection.
///
/// Shared by every cursor and bulk write created from a collection handle.
pub(crate) struct CollectionEndpoint {
    keyspace: String,
    name: String,
    url: String,
    connection: Connection,
}

impl CollectionEndpoint {
    async fn command(&self, payload: JsonValue) -> Result<JsonValue> {
        self.connection.transport.post(&self.url, payload).await
    }

    async fn insert_one(&self, op: &InsertOne) -> Result<Bson> {
        let document = prepare_document(&op.document, op.vector.as_deref())?;
        let result = self
            .command(serde_json::json!({ "insertOne": { "document": document } }))
            .await?;
        inserted_ids(&result).into_iter().next().ok_or_else(|| {
            DataApiError::Deserialization("insertOne response carries no inserted id".to_string())
        })
    }

    async fn insert_many(&self, op: &InsertMany) -> Result<InsertManyResult> {
        let vectors = op.vectors.as_deref();
        let documents: Vec<JsonValue> = op
            .documents
            .iter()
            .enumerate()
            .map(|(i, document)| {
                let vector = vectors.and_then(|v| v.get(i)).and_then(|v| v.as_deref());
                prepare_document(document, vector)
            })
            .collect::<Result<_>>()?;

        let chunk_size = self.connection.options.insert_many_chunk_size.max(1);
        let chunks: Vec<Vec<JsonValue>> =
            documents.chunks(chunk_size).map(|c| c.to_vec()).collect();
        debug!(
            collection = %self.name,
            documents = documents.len(),
            chunks = chunks.len(),
            ordered = op.ordered,
            "inserting documents"
        );

        // chunk outcomes are keyed by chunk position
        let mut accumulator = Accumulator::default();
        if op.ordered {
            for (position, chunk) in chunks.into_iter().enumerate() {
                let outcome = self.insert_chunk(chunk, true).await;
                let failed = outcome.is_err();
                accumulator.record(position, outcome);
                if failed {
                    break;
                }
            }
        } else {
            let concurrency = self.connection.options.bulk_write_concurrency.max(1);
            let outcomes: Vec<Result<WriteOutcome>> = futures::stream::iter(chunks)
                .map(|chunk| self.insert_chunk(chunk, false))
                .buffered(concurrency)
                .collect()
                .await;
            for (position, outcome) in outcomes.into_iter().enumerate() {
                accumulator.record(position, outcome);
            }
        }

        let result = accumulator.finish()?;
        let inserted_ids = result
            .operation_results
            .into_values()
            .flat_map(|outcome| match outcome {
                WriteOutcome::Inserted(inserted) => inserted.inserted_ids,
                _ => Vec::new(),
            })
            .collect();
        Ok(InsertManyResult { inserted_ids })
    }

    async fn insert_chunk(&self, documents: Vec<JsonValue>, ordered: bool) -> Result<WriteOutcome> {
        let result = self
            .command(serde_json::json!({
                "insertMany": { "documents": documents, "options": { "ordered": ordered } }
            }))
            .await?;
        Ok(WriteOutcome::Inserted(InsertManyResult {
            inserted_ids: inserted_ids(&result),
        }))
    }

    /// Run an update-style command, following `nextPageState` until the
    /// server has visited every match.
    async fn update(
        &self,
        command: &str,
        mut body: serde_json::Map<String, JsonValue>,
        upsert: bool,
    ) -> Result<UpdateResult> {
        let mut total = UpdateResult::default();
        let mut page_state: Option<String> = None;
        loop {
            let mut options = serde_json::Map::new();
            options.insert("upsert".to_string(), JsonValue::Bool(upsert));
            if let Some(state) = &page_state {
                options.insert("pageState".to_string(), JsonValue::String(state.clone()));
            }
            body.insert("options".to_string(), JsonValue::Object(options));

            let mut payload = serde_json::Map::new();
            payload.insert(command.to_string(), JsonValue::Object(body.clone()));
            let result = self.command(JsonValue::Object(payload)).await?;

            total.matched_count += status_count(&result, "matchedCount");
            total.modified_count += status_count(&result, "modifiedCount");
            if let Some(id) = result.pointer("/status/upsertedId") {
                total.upserted_id = Some(json_to_bson(id));
            }
            match result.pointer("/status/nextPageState").and_then(|v| v.as_str()) {
                Some(next) => page_state = Some(next.to_string()),
                None => break,
            }
        }
        Ok(total)
    }

    async fn update_one(&self, op: &UpdateOne) -> Result<UpdateResult> {
        let mut body = filter_body(&op.filter, op.vector.as_deref())?;
        body.insert("update".to_string(), document_to_json(&op.update)?);
        self.update("updateOne", body, op.upsert).await
    }

    async fn update_many(&self, op: &UpdateMany) -> Result<UpdateResult> {
        let mut body = filter_body(&op.filter, None)?;
        body.insert("update".to_string(), document_to_json(&op.update)?);
        self.update("updateMany", body, op.upsert).await
    }

    async fn replace_one(&self, op: &ReplaceOne) -> Result<UpdateResult> {
        let mut body = filter_body(&op.filter, op.vector.as_deref())?;
        body.insert("replacement".to_string(), document_to_json(&op.replacement)?);
        self.update("findOneAndReplace", body, op.upsert).await
    }

    /// Run a find-and-modify command and return the document the server
    /// sends back in `data.document`.
    async fn find_one_and_modify(
        &self,
        command: &str,
        mut body: serde_json::Map<String, JsonValue>,
        options: &FindOneAndModifyOptions,
    ) -> Result<Option<Document>> {
        if let Some(projection) = &options.projection {
            body.insert("projection".to_string(), document_to_json(projection)?);
        }
        if let Some(sort) = &options.sort {
            body.insert("sort".to_string(), document_to_json(sort)?);
        }
        let mut settings = serde_json::Map::new();
        if let Some(upsert) = options.upsert {
            settings.insert("upsert".to_string(), JsonValue::Bool(upsert));
        }
        if let Some(return_document) = options.return_document {
            settings.insert(
                "returnDocument".to_string(),
                JsonValue::String(return_document.as_str().to_string()),
            );
        }
        if !settings.is_empty() {
            body.insert("options".to_string(), JsonValue::Object(settings));
        }

        let mut payload = serde_json::Map::new();
        payload.insert(command.to_string(), JsonValue::Object(body));
        let result = self.command(JsonValue::Object(payload)).await?;
        match result.pointer("/data/document") {
            None | Some(JsonValue::Null) => Ok(None),
            Some(document) => json_to_document(document).map(Some),
        }
    }

    async fn delete_one(&self, op: &DeleteOne) -> Result<DeleteResult> {
        let body = filter_body(&op.filter, op.vector.as_deref())?;
        let result = self
            .command(serde_json::json!({ "deleteOne": body }))
            .await?;
        Ok(DeleteResult {
            deleted_count: status_count(&result, "deletedCount"),
        })
    }

    /// Delete every match, repeating while the server reports more data.
    async fn delete_many(&self, op: &DeleteMany) -> Result<DeleteResult> {
        let body = filter_body(&op.filter, None)?;
        let mut deleted_count = 0;
        loop {
            let result = self
                .command(serde_json::json!({ "deleteMany": body }))
                .await?;
            deleted_count += status_count(&result, "deletedCount");
            let more = result
                .pointer("/status/moreData")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !more {
                break;
            }
        }
        Ok(DeleteResult { deleted_count })
    }
}

#[async_trait]
impl PageFetcher for CollectionEndpoint {
    async fn fetch_page(&self, query: &FindQuery, page_state: Option<&str>) -> Result<Page> {
        let result = self.command(query.to_command(page_state)?).await?;
        let documents = match result.pointer("/data/documents") {
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(json_to_document)
                .collect::<Result<Vec<_>>>()?,
            Some(JsonValue::Null) | None => Vec::new(),
            Some(other) => {
                return Err(DataApiError::Deserialization(format!(
                    "expected a document array, got {other}"
                )))
            }
        };
        let next_page_state = result
            .pointer("/data/nextPageState")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Page {
            documents,
            next_page_state,
        })
    }
}

#[async_trait]
impl WriteDispatcher for CollectionEndpoint {
    async fn dispatch(&self, operation: &WriteOperation) -> Result<WriteOutcome> {
        match operation {
            WriteOperation::InsertOne(op) => {
                let id = self.insert_one(op).await?;
                Ok(WriteOutcome::Inserted(InsertManyResult {
                    inserted_ids: vec![id],
                }))
            }
            WriteOperation::InsertMany(op) => self.insert_many(op).await.map(WriteOutcome::Inserted),
            WriteOperation::UpdateOne(op) => self.update_one(op).await.map(WriteOutcome::Updated),
            WriteOperation::UpdateMany(op) => self.update_many(op).await.map(WriteOutcome::Updated),
            WriteOperation::ReplaceOne(op) => self.replace_one(op).await.map(WriteOutcome::Updated),
            WriteOperation::DeleteOne(op) => self.delete_one(op).await.map(WriteOutcome::Deleted),
            WriteOperation::DeleteMany(op) => self.delete_many(op).await.map(WriteOutcome::Deleted),
        }
    }
}

/// A handle to a Data API collection.
///
/// # Type Parameters
///
/// * `T` - The type of documents in this collection.
///
/// # Example
///
/// ```ignore
/// use data_api::{DataApiClient, bson::doc};
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Passage {
///     text: String,
///     tag: String,
/// }
///
/// let client = DataApiClient::from_env()?;
/// let passages = client.database().collection::<Passage>("passages");
///
/// passages
///     .insert_one_with_vector(
///         Passage { text: "hello".to_string(), tag: "greeting".to_string() },
///         vec![0.1, 0.9],
///     )
///     .await?;
/// ```
pub struct Collection<T> {
    endpoint: Arc<CollectionEndpoint>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T> {
    /// Create a new collection handle.
    pub(crate) fn new(keyspace: String, name: String, connection: Connection) -> Self {
        let url = connection.collection_url(&keyspace, &name);
        Self {
            endpoint: Arc::new(CollectionEndpoint {
                keyspace,
                name,
                url,
                connection,
            }),
            _marker: PhantomData,
        }
    }

    /// Get the collection name.
    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    /// Get the keyspace name.
    pub fn keyspace(&self) -> &str {
        &self.endpoint.keyspace
    }

    /// Get the full namespace (keyspace.collection).
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.endpoint.keyspace, self.endpoint.name)
    }

    /// Clone this collection with a new type parameter.
    pub fn clone_with_type<U>(&self) -> Collection<U> {
        Collection {
            endpoint: Arc::clone(&self.endpoint),
            _marker: PhantomData,
        }
    }

    fn fetcher(&self) -> Arc<dyn PageFetcher> {
        self.endpoint.clone()
    }
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        self.clone_with_type()
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("keyspace", &self.endpoint.keyspace)
            .field("name", &self.endpoint.name)
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static> Collection<T> {
    /// Insert a single document.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = collection.insert_one(doc! { "name": "John" }).await?;
    /// println!("Inserted ID: {:?}", result.inserted_id);
    /// ```
    pub async fn insert_one(&self, doc: impl Into<T>) -> Result<InsertOneResult> {
        self.run_insert_one(InsertOne::new(to_document(&doc.into())?))
            .await
    }

    /// Insert a single document together with its vector.
    pub async fn insert_one_with_vector(
        &self,
        doc: impl Into<T>,
        vector: Vec<f64>,
    ) -> Result<InsertOneResult> {
        self.run_insert_one(InsertOne::new(to_document(&doc.into())?).vector(vector))
            .await
    }

    async fn run_insert_one(&self, op: InsertOne) -> Result<InsertOneResult> {
        op.validate()?;
        let inserted_id = self.endpoint.insert_one(&op).await?;
        Ok(InsertOneResult { inserted_id })
    }

    /// Insert multiple documents, in chunks, stopping at the first failure.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let docs = vec![
    ///     doc! { "name": "John" },
    ///     doc! { "name": "Jane" },
    /// ];
    /// let result = collection.insert_many(docs).await?;
    /// ```
    pub async fn insert_many(&self, docs: impl IntoIterator<Item = T>) -> Result<InsertManyResult> {
        self.insert_many_with_options(docs, None).await
    }

    /// Insert multiple documents with one optional vector each.
    pub async fn insert_many_with_vectors(
        &self,
        docs: impl IntoIterator<Item = T>,
        vectors: Vec<Option<Vec<f64>>>,
    ) -> Result<InsertManyResult> {
        self.insert_many_with_options(docs, InsertManyOptions::builder().vectors(vectors).build())
            .await
    }

    /// Insert multiple documents with options.
    ///
    /// If any chunk fails the error is a [`DataApiError::BulkWrite`] whose
    /// positions are chunk indexes; the ids of the chunks that went through
    /// are kept in its partial result.
    pub async fn insert_many_with_options(
        &self,
        docs: impl IntoIterator<Item = T>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> Result<InsertManyResult> {
        let options = options.into().unwrap_or_default();
        let documents = docs
            .into_iter()
            .map(|d| to_document(&d))
            .collect::<Result<Vec<_>>>()?;
        let op = InsertMany {
            documents,
            vectors: options.vectors,
            ordered: options.ordered.unwrap_or(true),
        };
        op.validate()?;
        self.endpoint.insert_many(&op).await
    }

    /// Find documents matching a filter.
    ///
    /// Nothing is sent until the cursor is first pulled.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cursor = collection.find(doc! { "status": "active" }, None)?;
    /// let docs: Vec<User> = cursor.collect().await?;
    /// ```
    pub fn find(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor<T>> {
        let query = FindQuery::new(
            filter.into().unwrap_or_default(),
            options.into().unwrap_or_default(),
        )?;
        Ok(Cursor::new(Arc::new(query), self.fetcher()))
    }

    /// Find a single document.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let best = collection
    ///     .find_one(None, FindOptions::builder().vector(vec![0.2, 0.8]).build())
    ///     .await?;
    /// ```
    pub async fn find_one(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Option<T>> {
        let mut options = options.into().unwrap_or_default();
        if options.include_similarity == Some(true) && options.vector.is_none() {
            return Err(DataApiError::invalid_argument(
                "include_similarity requires a vector search",
            ));
        }
        options.limit = Some(1);
        let mut cursor = self.find(filter, options)?;
        cursor.try_next().await
    }

    /// Update a single document.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = collection.update_one(
    ///     doc! { "_id": id },
    ///     doc! { "$set": { "name": "Jane" } },
    /// ).await?;
    /// ```
    pub async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateResult> {
        self.update_one_with_options(filter, update, None).await
    }

    /// Update a single document with options.
    pub async fn update_one_with_options(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> Result<UpdateResult> {
        let options = options.into().unwrap_or_default();
        let op = UpdateOne {
            filter,
            update,
            vector: options.vector,
            upsert: options.upsert.unwrap_or(false),
        };
        check_vector(op.vector.as_deref())?;
        self.endpoint.update_one(&op).await
    }

    /// Update every matching document.
    pub async fn update_many(&self, filter: Document, update: Document) -> Result<UpdateResult> {
        self.update_many_with_options(filter, update, None).await
    }

    /// Update every matching document with options.
    pub async fn update_many_with_options(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> Result<UpdateResult> {
        let options = options.into().unwrap_or_default();
        if options.vector.is_some() {
            return Err(DataApiError::invalid_argument(
                "update_many does not accept a vector",
            ));
        }
        let op = UpdateMany {
            filter,
            update,
            upsert: options.upsert.unwrap_or(false),
        };
        self.endpoint.update_many(&op).await
    }

    /// Replace a single document.
    pub async fn replace_one(&self, filter: Document, replacement: T) -> Result<UpdateResult> {
        self.replace_one_with_options(filter, replacement, None)
            .await
    }

    /// Replace a single document with options.
    pub async fn replace_one_with_options(
        &self,
        filter: Document,
        replacement: T,
        options: impl Into<Option<UpdateOptions>>,
    ) -> Result<UpdateResult> {
        let options = options.into().unwrap_or_default();
        let op = ReplaceOne {
            filter,
            replacement: to_document(&replacement)?,
            vector: options.vector,
            upsert: options.upsert.unwrap_or(false),
        };
        check_vector(op.vector.as_deref())?;
        self.endpoint.replace_one(&op).await
    }

    /// Replace one document and return it, as it was before the write
    /// unless [`ReturnDocument::After`] is asked for.
    ///
    /// Returns `None` when nothing matched and no document was upserted.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let previous = collection
    ///     .find_one_and_replace(doc! { "_id": id }, replacement, None)
    ///     .await?;
    /// ```
    pub async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: T,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> Result<Option<T>> {
        let options = options.into().unwrap_or_default();
        options.validate()?;
        let mut body = filter_body(&filter, options.vector.as_deref())?;
        body.insert(
            "replacement".to_string(),
            document_to_json(&to_document(&replacement)?)?,
        );
        self.endpoint
            .find_one_and_modify("findOneAndReplace", body, &options)
            .await?
            .map(decode)
            .transpose()
    }

    /// Update one document and return it, as it was before the write
    /// unless [`ReturnDocument::After`] is asked for.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let updated = collection
    ///     .find_one_and_update(
    ///         doc! { "status": "queued" },
    ///         doc! { "$set": { "status": "running" } },
    ///         FindOneAndModifyOptions::builder()
    ///             .sort(doc! { "priority": -1 })
    ///             .return_document(ReturnDocument::After)
    ///             .build(),
    ///     )
    ///     .await?;
    /// ```
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> Result<Option<T>> {
        let options = options.into().unwrap_or_default();
        options.validate()?;
        let mut body = filter_body(&filter, options.vector.as_deref())?;
        body.insert("update".to_string(), document_to_json(&update)?);
        self.endpoint
            .find_one_and_modify("findOneAndUpdate", body, &options)
            .await?
            .map(decode)
            .transpose()
    }

    /// Delete one document and return it.
    pub async fn find_one_and_delete(
        &self,
        filter: Document,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> Result<Option<T>> {
        let options = options.into().unwrap_or_default();
        options.validate()?;
        if options.upsert.is_some() || options.return_document.is_some() {
            return Err(DataApiError::invalid_argument(
                "find_one_and_delete accepts neither upsert nor return_document",
            ));
        }
        let body = filter_body(&filter, options.vector.as_deref())?;
        self.endpoint
            .find_one_and_modify("findOneAndDelete", body, &options)
            .await?
            .map(decode)
            .transpose()
    }

    /// Delete a single document.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = collection.delete_one(doc! { "_id": id }).await?;
    /// ```
    pub async fn delete_one(&self, filter: Document) -> Result<DeleteResult> {
        self.endpoint.delete_one(&DeleteOne::new(filter)).await
    }

    /// Delete the match most similar to `vector`.
    pub async fn delete_one_with_vector(
        &self,
        filter: Document,
        vector: Vec<f64>,
    ) -> Result<DeleteResult> {
        let op = DeleteOne::new(filter).vector(vector);
        check_vector(op.vector.as_deref())?;
        self.endpoint.delete_one(&op).await
    }

    /// Delete every matching document.
    ///
    /// An empty filter is rejected; use [`Collection::delete_all`].
    pub async fn delete_many(&self, filter: Document) -> Result<DeleteResult> {
        let op = DeleteMany::new(filter);
        op.validate()?;
        self.endpoint.delete_many(&op).await
    }

    /// Delete every document in the collection.
    pub async fn delete_all(&self) -> Result<()> {
        debug!(collection = %self.endpoint.name, "deleting all documents");
        self.endpoint
            .command(serde_json::json!({ "deleteMany": {} }))
            .await?;
        Ok(())
    }

    /// Count documents matching a filter.
    ///
    /// Fails with [`DataApiError::TooManyDocumentsToCount`] when more than
    /// `upper_bound` documents match or the server stops counting early.
    pub async fn count_documents(
        &self,
        filter: impl Into<Option<Document>>,
        upper_bound: u64,
    ) -> Result<u64> {
        let filter = filter.into().unwrap_or_default();
        let result = self
            .endpoint
            .command(serde_json::json!({
                "countDocuments": { "filter": document_to_json(&filter)? }
            }))
            .await?;

        let count = result
            .pointer("/status/count")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DataApiError::Deserialization("expected count as number".to_string()))?;
        let more_data = result
            .pointer("/status/moreData")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if more_data || count > upper_bound {
            return Err(DataApiError::TooManyDocumentsToCount { upper_bound });
        }
        Ok(count)
    }

    /// Distinct values of a dotted path over the documents matching a filter.
    ///
    /// Only the part of the path before its first list index is requested
    /// from the server.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let tags = collection.distinct("metadata.tags", doc! { "lang": "en" }).await?;
    /// ```
    pub async fn distinct(
        &self,
        path: &str,
        filter: impl Into<Option<Document>>,
    ) -> Result<Vec<Bson>> {
        let field = FieldPath::parse(path)?;
        let projection = field.safe_prefix().map(|prefix| {
            let mut projection = Document::new();
            projection.insert(prefix, true);
            projection
        });
        let options = FindOptions {
            projection,
            ..FindOptions::default()
        };
        let query = FindQuery::new(filter.into().unwrap_or_default(), options)?;
        let mut cursor: Cursor<Document> = Cursor::new(Arc::new(query), self.fetcher());
        cursor.distinct(field.as_str()).await
    }

    /// Run a batch of write operations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = collection
    ///     .bulk_write(
    ///         vec![
    ///             InsertOne::new(doc! { "seq": 0 }).into(),
    ///             UpdateMany::new(doc! { "seq": 0 }, doc! { "$set": { "seen": true } }).into(),
    ///         ],
    ///         BulkWriteOptions::builder().ordered(false).build(),
    ///     )
    ///     .await?;
    /// ```
    pub async fn bulk_write(
        &self,
        operations: impl IntoIterator<Item = WriteOperation>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Result<BulkWriteResult> {
        self.bulk_write_with_cancellation(operations, options, CancellationToken::new())
            .await
    }

    /// Run a batch of write operations that stops dispatching once `cancel`
    /// fires.
    pub async fn bulk_write_with_cancellation(
        &self,
        operations: impl IntoIterator<Item = WriteOperation>,
        options: impl Into<Option<BulkWriteOptions>>,
        cancel: CancellationToken,
    ) -> Result<BulkWriteResult> {
        let executor = BulkExecutor::new(self.endpoint.clone())
            .with_default_concurrency(self.endpoint.connection.options.bulk_write_concurrency);
        executor
            .execute_with_cancellation(
                operations.into_iter().collect(),
                options.into().unwrap_or_default(),
                cancel,
            )
            .await
    }

    /// Drop the collection.
    pub async fn drop(&self) -> Result<()> {
        let url = self.endpoint.connection.keyspace_url(&self.endpoint.keyspace);
        self.endpoint
            .connection
            .transport
            .post(
                &url,
                serde_json::json!({ "deleteCollection": { "name": self.endpoint.name } }),
            )
            .await?;
        Ok(())
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    Ok(bson::to_document(value)?)
}

/// JSON form of a document to insert, with `vector` stored as `$vector`.
fn prepare_document(document: &Document, vector: Option<&[f64]>) -> Result<JsonValue> {
    let mut json = document_to_json(document)?;
    if let (Some(vector), JsonValue::Object(map)) = (vector, &mut json) {
        map.insert("$vector".to_string(), vector_to_json(vector)?);
    }
    Ok(json)
}

/// Command body holding a filter and, for vector operations, the `$vector` sort.
fn filter_body(
    filter: &Document,
    vector: Option<&[f64]>,
) -> Result<serde_json::Map<String, JsonValue>> {
    let mut body = serde_json::Map::new();
    body.insert("filter".to_string(), document_to_json(filter)?);
    if let Some(vector) = vector {
        body.insert(
            "sort".to_string(),
            serde_json::json!({ "$vector": vector_to_json(vector)? }),
        );
    }
    Ok(body)
}

fn inserted_ids(result: &JsonValue) -> Vec<Bson> {
    result
        .pointer("/status/insertedIds")
        .and_then(|v| v.as_array())
        .map(|ids| ids.iter().map(json_to_bson).collect())
        .unwrap_or_default()
}

fn status_count(result: &JsonValue, key: &str) -> u64 {
    result
        .get("status")
        .and_then(|status| status.get(key))
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::transport::{check_api_errors, Transport};
    use bson::doc;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&JsonValue) -> JsonValue + Send + Sync>;

    struct MockTransport {
        requests: Mutex<Vec<(String, JsonValue)>>,
        respond: Responder,
    }

    impl MockTransport {
        fn new(respond: impl Fn(&JsonValue) -> JsonValue + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn payloads(&self) -> Vec<JsonValue> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(&self, url: &str, payload: JsonValue) -> Result<JsonValue> {
            let response = (self.respond)(&payload);
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), payload));
            check_api_errors(&response)?;
            Ok(response)
        }
    }

    fn collection_with(transport: Arc<MockTransport>, chunk_size: usize) -> Collection<Document> {
        let options = ClientOptions::builder()
            .api_endpoint("https://db.example.com")
            .token("t")
            .insert_many_chunk_size(chunk_size)
            .build();
        let connection = Connection {
            options: Arc::new(options),
            transport,
        };
        Collection::new("ks".to_string(), "docs".to_string(), connection)
    }

    #[test]
    fn test_insert_many_result_default() {
        let result = InsertManyResult::default();
        assert!(result.inserted_ids.is_empty());
    }

    #[test]
    fn test_update_options_builder() {
        let options = UpdateOptions::builder()
            .upsert(true)
            .vector(vec![0.1, 0.2])
            .build();

        assert_eq!(options.upsert, Some(true));
        assert_eq!(options.vector, Some(vec![0.1, 0.2]));
    }

    #[test]
    fn test_update_options_default() {
        let options = UpdateOptions::default();
        assert!(options.upsert.is_none());
        assert!(options.vector.is_none());
    }

    #[test]
    fn test_prepare_document_adds_vector() {
        let json = prepare_document(&doc! { "text": "hi" }, Some(&[1.0, 0.5])).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "hi", "$vector": [1.0, 0.5] }));
    }

    #[test]
    fn test_filter_body_with_vector() {
        let body = filter_body(&doc! { "tag": "a" }, Some(&[0.0, 1.0])).unwrap();
        assert_eq!(
            JsonValue::Object(body),
            serde_json::json!({ "filter": { "tag": "a" }, "sort": { "$vector": [0.0, 1.0] } })
        );
    }

    #[test]
    fn test_collection_names() {
        let transport = MockTransport::new(|_| serde_json::json!({}));
        let collection = collection_with(transport, 20);
        assert_eq!(collection.name(), "docs");
        assert_eq!(collection.keyspace(), "ks");
        assert_eq!(collection.namespace(), "ks.docs");
        assert_eq!(collection.endpoint.url, "https://db.example.com/api/json/v1/ks/docs");
    }

    #[tokio::test]
    async fn test_insert_many_is_chunked() {
        let transport = MockTransport::new(|payload| {
            let docs = payload["insertMany"]["documents"].as_array().unwrap();
            let ids: Vec<JsonValue> = docs.iter().map(|d| d["seq"].clone()).collect();
            serde_json::json!({ "status": { "insertedIds": ids } })
        });
        let collection = collection_with(transport.clone(), 20);

        let docs: Vec<Document> = (0..45).map(|i| doc! { "seq": i }).collect();
        let result = collection.insert_many(docs).await.unwrap();

        assert_eq!(result.inserted_ids.len(), 45);
        assert_eq!(result.inserted_ids[44], Bson::Int64(44));
        let sizes: Vec<usize> = transport
            .payloads()
            .iter()
            .map(|p| p["insertMany"]["documents"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }

    fn failing_chunk_responder(payload: &JsonValue) -> JsonValue {
        let docs = payload["insertMany"]["documents"].as_array().unwrap();
        if docs.iter().any(|d| d["seq"] == 25) {
            return serde_json::json!({
                "errors": [{ "message": "chunk rejected", "errorCode": "DOCUMENT_ALREADY_EXISTS" }]
            });
        }
        let ids: Vec<JsonValue> = docs.iter().map(|d| d["seq"].clone()).collect();
        serde_json::json!({ "status": { "insertedIds": ids } })
    }

    #[tokio::test]
    async fn test_unordered_insert_many_keeps_successful_ids() {
        let transport = MockTransport::new(failing_chunk_responder);
        let collection = collection_with(transport.clone(), 10);

        let docs: Vec<Document> = (0..40).map(|i| doc! { "seq": i }).collect();
        let err = collection
            .insert_many_with_options(docs, InsertManyOptions::builder().ordered(false).build())
            .await
            .unwrap_err();

        let bulk = err.as_bulk_write().unwrap();
        assert_eq!(bulk.failed_positions(), vec![2]);
        assert_eq!(bulk.succeeded_positions(), vec![0, 1, 3]);
        assert_eq!(bulk.partial_result.inserted_count, 30);
        assert_eq!(bulk.failures[0].error.code(), Some("DOCUMENT_ALREADY_EXISTS"));
        assert_eq!(transport.payloads().len(), 4);
    }

    #[tokio::test]
    async fn test_ordered_insert_many_stops_and_keeps_earlier_ids() {
        let transport = MockTransport::new(failing_chunk_responder);
        let collection = collection_with(transport.clone(), 10);

        let docs: Vec<Document> = (0..40).map(|i| doc! { "seq": i }).collect();
        let err = collection.insert_many(docs).await.unwrap_err();

        let bulk = err.as_bulk_write().unwrap();
        assert_eq!(bulk.failed_positions(), vec![2]);
        assert_eq!(bulk.partial_result.inserted_count, 20);
        match &bulk.partial_result.operation_results[&1] {
            WriteOutcome::Inserted(result) => {
                assert_eq!(result.inserted_ids.first(), Some(&Bson::Int64(10)));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(transport.payloads().len(), 3);
    }

    #[tokio::test]
    async fn test_insert_one_with_vector_conflict_sends_nothing() {
        let transport = MockTransport::new(|_| serde_json::json!({}));
        let collection = collection_with(transport.clone(), 20);

        let err = collection
            .insert_one_with_vector(doc! { "$vector": [1.0] }, vec![1.0])
            .await
            .unwrap_err();
        assert!(matches!(err, DataApiError::InvalidArgument(_)));
        assert!(transport.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_update_many_follows_page_state() {
        let transport = MockTransport::new(|payload| {
            match payload["updateMany"]["options"].get("pageState") {
                None => serde_json::json!({
                    "status": { "matchedCount": 20, "modifiedCount": 20, "nextPageState": "p2" }
                }),
                Some(_) => serde_json::json!({
                    "status": { "matchedCount": 3, "modifiedCount": 2 }
                }),
            }
        });
        let collection = collection_with(transport.clone(), 20);

        let result = collection
            .update_many(doc! { "group": "A" }, doc! { "$set": { "seen": true } })
            .await
            .unwrap();
        assert_eq!(result.matched_count, 23);
        assert_eq!(result.modified_count, 22);
        assert_eq!(transport.payloads().len(), 2);
        assert_eq!(
            transport.payloads()[1]["updateMany"]["options"]["pageState"],
            "p2"
        );
    }

    #[tokio::test]
    async fn test_delete_many_repeats_while_more_data() {
        let transport = MockTransport::new({
            let calls = Mutex::new(0);
            move |_| {
                let mut calls = calls.lock().unwrap();
                *calls += 1;
                let more = *calls < 3;
                serde_json::json!({
                    "status": { "deletedCount": 20, "moreData": more }
                })
            }
        });
        let collection = collection_with(transport.clone(), 20);

        let result = collection.delete_many(doc! { "old": true }).await.unwrap();
        assert_eq!(result.deleted_count, 60);
        assert_eq!(transport.payloads().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_many_empty_filter_rejected() {
        let transport = MockTransport::new(|_| serde_json::json!({}));
        let collection = collection_with(transport.clone(), 20);

        assert!(collection.delete_many(doc! {}).await.is_err());
        assert!(transport.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_count_documents_upper_bound() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({ "status": { "count": 12 } })
        });
        let collection = collection_with(transport, 20);

        assert_eq!(collection.count_documents(None, 100).await.unwrap(), 12);
        let err = collection.count_documents(None, 10).await.unwrap_err();
        assert!(matches!(
            err,
            DataApiError::TooManyDocumentsToCount { upper_bound: 10 }
        ));
    }

    #[tokio::test]
    async fn test_count_documents_more_data() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({ "status": { "count": 1000, "moreData": true } })
        });
        let collection = collection_with(transport, 20);
        assert!(collection.count_documents(None, 5000).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_one_uses_find_one_and_replace() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({ "status": { "matchedCount": 0, "modifiedCount": 0, "upsertedId": "new-id" } })
        });
        let collection = collection_with(transport.clone(), 20);

        let result = collection
            .replace_one_with_options(
                doc! { "k": 1 },
                doc! { "k": 1, "v": "x" },
                UpdateOptions::builder().upsert(true).vector(vec![0.5, 0.5]).build(),
            )
            .await
            .unwrap();
        assert_eq!(result.upserted_id, Some(Bson::String("new-id".to_string())));

        let payload = &transport.payloads()[0];
        assert_eq!(
            payload,
            &serde_json::json!({
                "findOneAndReplace": {
                    "filter": { "k": 1 },
                    "sort": { "$vector": [0.5, 0.5] },
                    "replacement": { "k": 1, "v": "x" },
                    "options": { "upsert": true },
                }
            })
        );
    }

    #[tokio::test]
    async fn test_find_one_and_replace_returns_document() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({
                "data": { "document": { "_id": "a1", "k": 1, "v": "new" } },
                "status": { "matchedCount": 1, "modifiedCount": 1 },
            })
        });
        let collection = collection_with(transport.clone(), 20);

        let options = FindOneAndModifyOptions::builder()
            .sort(doc! { "rank": -1 })
            .projection(doc! { "k": 1, "v": 1 })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let found = collection
            .find_one_and_replace(doc! { "k": 1 }, doc! { "k": 1, "v": "new" }, options)
            .await
            .unwrap();
        assert_eq!(found, Some(doc! { "_id": "a1", "k": 1, "v": "new" }));
        assert_eq!(
            transport.payloads()[0],
            serde_json::json!({
                "findOneAndReplace": {
                    "filter": { "k": 1 },
                    "replacement": { "k": 1, "v": "new" },
                    "projection": { "k": 1, "v": 1 },
                    "sort": { "rank": -1 },
                    "options": { "upsert": true, "returnDocument": "after" },
                }
            })
        );
    }

    #[tokio::test]
    async fn test_find_one_and_update_with_vector() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({
                "data": { "document": { "_id": "b2", "seen": false } },
                "status": { "matchedCount": 1, "modifiedCount": 1 },
            })
        });
        let collection = collection_with(transport.clone(), 20);

        let options = FindOneAndModifyOptions::builder()
            .vector(vec![0.1, 0.9])
            .return_document(ReturnDocument::Before)
            .build();
        let before = collection
            .find_one_and_update(doc! {}, doc! { "$set": { "seen": true } }, options)
            .await
            .unwrap();
        assert_eq!(before, Some(doc! { "_id": "b2", "seen": false }));
        assert_eq!(
            transport.payloads()[0],
            serde_json::json!({
                "findOneAndUpdate": {
                    "filter": {},
                    "sort": { "$vector": [0.1, 0.9] },
                    "update": { "$set": { "seen": true } },
                    "options": { "returnDocument": "before" },
                }
            })
        );
    }

    #[tokio::test]
    async fn test_find_one_and_update_no_match() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({
                "data": { "document": null },
                "status": { "matchedCount": 0, "modifiedCount": 0 },
            })
        });
        let collection = collection_with(transport, 20);

        let found = collection
            .find_one_and_update(doc! { "k": 404 }, doc! { "$set": { "a": 1 } }, None)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_find_one_and_delete_returns_removed() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({
                "data": { "document": { "_id": "c3", "old": true } },
                "status": { "deletedCount": 1 },
            })
        });
        let collection = collection_with(transport.clone(), 20);

        let removed = collection
            .find_one_and_delete(
                doc! { "old": true },
                FindOneAndModifyOptions::builder().sort(doc! { "at": 1 }).build(),
            )
            .await
            .unwrap();
        assert_eq!(removed, Some(doc! { "_id": "c3", "old": true }));
        assert_eq!(
            transport.payloads()[0],
            serde_json::json!({
                "findOneAndDelete": { "filter": { "old": true }, "sort": { "at": 1 } }
            })
        );
    }

    #[tokio::test]
    async fn test_find_one_and_modify_rejects_bad_options() {
        let transport = MockTransport::new(|_| serde_json::json!({}));
        let collection = collection_with(transport.clone(), 20);

        let conflict = FindOneAndModifyOptions::builder()
            .vector(vec![1.0])
            .sort(doc! { "a": 1 })
            .build();
        let err = collection
            .find_one_and_update(doc! {}, doc! { "$set": { "a": 1 } }, conflict)
            .await
            .unwrap_err();
        assert!(matches!(err, DataApiError::InvalidArgument(_)));

        let upsert = FindOneAndModifyOptions::builder().upsert(true).build();
        let err = collection
            .find_one_and_delete(doc! {}, upsert)
            .await
            .unwrap_err();
        assert!(matches!(err, DataApiError::InvalidArgument(_)));
        assert!(transport.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_narrows_projection() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({
                "data": {
                    "documents": [
                        { "x": [{ "y": "a" }, { "y": "b" }] },
                        { "x": [{ "y": "b" }] },
                    ],
                    "nextPageState": null,
                }
            })
        });
        let collection = collection_with(transport.clone(), 20);

        let values = collection.distinct("x.0.y", None).await.unwrap();
        assert_eq!(values, vec![Bson::String("a".to_string()), Bson::String("b".to_string())]);
        assert_eq!(
            transport.payloads()[0]["find"]["projection"],
            serde_json::json!({ "x": true })
        );
    }

    #[tokio::test]
    async fn test_find_one_similarity_without_vector() {
        let transport = MockTransport::new(|_| serde_json::json!({}));
        let collection = collection_with(transport.clone(), 20);

        let err = collection
            .find_one(None, FindOptions::builder().include_similarity(true).build())
            .await
            .unwrap_err();
        assert!(err.is_client_side());
        assert!(transport.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_surfaces_code() {
        let transport = MockTransport::new(|_| {
            serde_json::json!({
                "errors": [{ "message": "Document already exists", "errorCode": "DOCUMENT_ALREADY_EXISTS" }]
            })
        });
        let collection = collection_with(transport, 20);

        let err = collection.insert_one(doc! { "_id": 1 }).await.unwrap_err();
        assert_eq!(err.code(), Some("DOCUMENT_ALREADY_EXISTS"));
    }
}
