//! Database (keyspace) handle for managing collections.

use crate::client::Connection;
use crate::collection::Collection;
use crate::error::{DataApiError, Result};
use bson::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::debug;

/// A handle to one keyspace of a Data API database.
///
/// # Example
///
/// ```ignore
/// let db = client.database();
///
/// let collections = db.list_collection_names().await?;
/// println!("Collections: {:?}", collections);
/// ```
#[derive(Clone)]
pub struct Database {
    /// Keyspace name.
    pub(crate) name: String,
    pub(crate) connection: Connection,
}

impl Database {
    /// Create a new database handle.
    pub(crate) fn new(name: String, connection: Connection) -> Self {
        Self { name, connection }
    }

    /// Get the keyspace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a handle to a collection with a specific type.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use serde::{Serialize, Deserialize};
    ///
    /// #[derive(Debug, Serialize, Deserialize)]
    /// struct Passage {
    ///     text: String,
    ///     source: String,
    /// }
    ///
    /// let passages = db.collection::<Passage>("passages");
    /// ```
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static,
    {
        Collection::new(self.name.clone(), name.to_string(), self.connection.clone())
    }

    /// Get a handle to a collection with Document type.
    pub fn collection_with_doc(&self, name: &str) -> Collection<Document> {
        Collection::new(self.name.clone(), name.to_string(), self.connection.clone())
    }

    async fn command(&self, payload: JsonValue) -> Result<JsonValue> {
        let url = self.connection.keyspace_url(&self.name);
        self.connection.transport.post(&url, payload).await
    }

    /// List all collection names in this keyspace.
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let result = self
            .command(serde_json::json!({ "findCollections": {} }))
            .await?;

        let names = result
            .pointer("/status/collections")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    /// Create a new collection.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let docs = db.create_collection("docs").await?;
    /// ```
    pub async fn create_collection(&self, name: &str) -> Result<Collection<Document>> {
        self.create_collection_with_options(name, CreateCollectionOptions::default())
            .await
    }

    /// Create a collection with options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let options = CreateCollectionOptions::builder()
    ///     .dimension(1536)
    ///     .metric(SimilarityMetric::Cosine)
    ///     .build();
    /// let passages = db.create_collection_with_options("passages", options).await?;
    /// ```
    pub async fn create_collection_with_options(
        &self,
        name: &str,
        options: CreateCollectionOptions,
    ) -> Result<Collection<Document>> {
        let mut create = serde_json::Map::new();
        create.insert("name".to_string(), serde_json::json!(name));
        if let Some(vector) = options.to_vector_options()? {
            create.insert("options".to_string(), serde_json::json!({ "vector": vector }));
        }

        debug!(keyspace = %self.name, collection = name, "creating collection");
        self.command(serde_json::json!({ "createCollection": create }))
            .await?;
        Ok(self.collection_with_doc(name))
    }

    /// Drop a collection.
    ///
    /// # Warning
    ///
    /// This permanently deletes the collection and all its documents.
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        debug!(keyspace = %self.name, collection = name, "dropping collection");
        self.command(serde_json::json!({ "deleteCollection": { "name": name } }))
            .await?;
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Similarity function of a vector-enabled collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMetric {
    /// Cosine similarity.
    Cosine,
    /// Dot product.
    DotProduct,
    /// Euclidean distance.
    Euclidean,
}

impl SimilarityMetric {
    /// Name used by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::DotProduct => "dot_product",
            SimilarityMetric::Euclidean => "euclidean",
        }
    }
}

/// Options for creating a collection.
#[derive(Debug, Clone, Default)]
pub struct CreateCollectionOptions {
    /// Vector dimension; enables vector search when set.
    pub dimension: Option<u32>,
    /// Similarity metric for vector search.
    pub metric: Option<SimilarityMetric>,
}

impl CreateCollectionOptions {
    /// Create a new builder.
    pub fn builder() -> CreateCollectionOptionsBuilder {
        CreateCollectionOptionsBuilder::default()
    }

    fn to_vector_options(&self) -> Result<Option<JsonValue>> {
        match (self.dimension, self.metric) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(DataApiError::invalid_argument(
                "a similarity metric requires a vector dimension",
            )),
            (Some(0), _) => Err(DataApiError::invalid_argument(
                "vector dimension must be positive",
            )),
            (Some(dimension), metric) => {
                let mut vector = serde_json::Map::new();
                vector.insert("dimension".to_string(), serde_json::json!(dimension));
                if let Some(metric) = metric {
                    vector.insert("metric".to_string(), serde_json::json!(metric.as_str()));
                }
                Ok(Some(JsonValue::Object(vector)))
            }
        }
    }
}

/// Builder for CreateCollectionOptions.
#[derive(Debug, Clone, Default)]
pub struct CreateCollectionOptionsBuilder {
    options: CreateCollectionOptions,
}

impl CreateCollectionOptionsBuilder {
    /// Set the vector dimension.
    pub fn dimension(mut self, dimension: u32) -> Self {
        self.options.dimension = Some(dimension);
        self
    }

    /// Set the similarity metric.
    pub fn metric(mut self, metric: SimilarityMetric) -> Self {
        self.options.metric = Some(metric);
        self
    }

    /// Build the options.
    pub fn build(self) -> CreateCollectionOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_collection_options_builder() {
        let options = CreateCollectionOptions::builder()
            .dimension(5)
            .metric(SimilarityMetric::DotProduct)
            .build();

        assert_eq!(options.dimension, Some(5));
        assert_eq!(options.metric, Some(SimilarityMetric::DotProduct));
        assert_eq!(
            options.to_vector_options().unwrap(),
            Some(serde_json::json!({ "dimension": 5, "metric": "dot_product" }))
        );
    }

    #[test]
    fn test_create_collection_options_default() {
        let options = CreateCollectionOptions::default();
        assert!(options.dimension.is_none());
        assert!(options.metric.is_none());
        assert_eq!(options.to_vector_options().unwrap(), None);
    }

    #[test]
    fn test_metric_without_dimension() {
        let options = CreateCollectionOptions::builder()
            .metric(SimilarityMetric::Cosine)
            .build();
        assert!(matches!(
            options.to_vector_options(),
            Err(DataApiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_dimension() {
        let options = CreateCollectionOptions::builder().dimension(0).build();
        assert!(options.to_vector_options().is_err());
    }

    #[test]
    fn test_similarity_metric_names() {
        assert_eq!(SimilarityMetric::Cosine.as_str(), "cosine");
        assert_eq!(SimilarityMetric::Euclidean.as_str(), "euclidean");
    }
}
