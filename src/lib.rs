//! # data-api-client
//!
//! Async client for JSON-document databases that speak the Data API, with
//! vector search.
//!
//! The crate is built around three pieces:
//!
//! - [`Cursor`]: lazy, page-by-page iteration over `find` results, with
//!   `rewind`, independent clones and client-side `distinct`.
//! - [`FieldPath`]: dotted-path extraction that fans out over arrays and
//!   indexes into them, used by `distinct`.
//! - [`BulkExecutor`]: ordered or bounded-concurrency unordered execution of
//!   mixed write operations with one aggregated result.
//!
//! ## Features
//!
//! - Async/await support with tokio
//! - Full CRUD operations plus vector similarity search
//! - Cursor-based iteration (`futures::Stream`)
//! - Bulk writes with cancellation
//!
//! ## Quick Start
//!
//! ```ignore
//! use data_api::{DataApiClient, FindOptions, bson::doc};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Passage {
//!     text: String,
//!     tag: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> data_api::Result<()> {
//!     // Reads ASTRA_DB_API_ENDPOINT / ASTRA_DB_APPLICATION_TOKEN
//!     let client = DataApiClient::from_env()?;
//!     let passages = client.database().collection::<Passage>("passages");
//!
//!     passages
//!         .insert_one_with_vector(
//!             Passage { text: "hello".to_string(), tag: "greeting".to_string() },
//!             vec![0.1, 0.9],
//!         )
//!         .await?;
//!
//!     // Most similar documents first
//!     let options = FindOptions::builder().vector(vec![0.1, 0.8]).limit(3).build();
//!     let nearest: Vec<Passage> = passages.find(None, options)?.collect().await?;
//!
//!     let tags = passages.distinct("tag", doc! {}).await?;
//!     println!("{nearest:?} {tags:?}");
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod client;
pub mod collection;
pub mod convert;
pub mod cursor;
pub mod db;
pub mod error;
pub mod path;
pub mod query;
pub mod transport;

// Re-export main types
pub use bulk::{
    BulkExecutor, BulkWriteError, BulkWriteOptions, BulkWriteOptionsBuilder, BulkWriteResult,
    DeleteMany, DeleteOne, InsertMany, InsertOne, OperationFailure, ReplaceOne, UpdateMany,
    UpdateOne, WriteDispatcher, WriteOperation, WriteOutcome,
};
pub use client::{ClientOptions, ClientOptionsBuilder, DataApiClient};
pub use collection::{
    Collection, DeleteResult, FindOneAndModifyOptions, FindOneAndModifyOptionsBuilder,
    InsertManyOptions, InsertManyOptionsBuilder, InsertManyResult, InsertOneResult,
    ReturnDocument, UpdateOptions, UpdateOptionsBuilder, UpdateResult,
};
pub use cursor::{Cursor, CursorState, Page, PageFetcher};
pub use db::{CreateCollectionOptions, CreateCollectionOptionsBuilder, Database, SimilarityMetric};
pub use error::{DataApiError, ErrorKind, Result};
pub use path::{DistinctValues, FieldPath};
pub use query::{FindOptions, FindOptionsBuilder, FindQuery};
pub use transport::{HttpTransport, Transport};

// Re-export bson for convenience
pub use bson;
pub use bson::doc;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports.
pub mod prelude {
    pub use super::bulk::{
        BulkWriteOptions, BulkWriteResult, DeleteMany, DeleteOne, InsertMany, InsertOne,
        ReplaceOne, UpdateMany, UpdateOne, WriteOperation,
    };
    pub use super::client::{ClientOptions, DataApiClient};
    pub use super::collection::{
        Collection, DeleteResult, InsertManyResult, InsertOneResult, UpdateOptions, UpdateResult,
    };
    pub use super::cursor::Cursor;
    pub use super::db::Database;
    pub use super::error::{DataApiError, ErrorKind, Result};
    pub use super::query::FindOptions;
    pub use bson::{doc, Bson, Document};
    pub use serde::{Deserialize, Serialize};
}

/// Get the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
