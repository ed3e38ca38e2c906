//! Query descriptors for `find` operations.

use crate::convert::{document_to_json, vector_to_json};
use crate::error::{DataApiError, Result};
use bson::{Bson, Document};
use serde_json::Value as JsonValue;

/// Options for find operations.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Number of documents to skip. Only honored for sorted or vector queries.
    pub skip: Option<u64>,
    /// Sort order, field to 1 (ascending) or -1 (descending).
    pub sort: Option<Document>,
    /// Projection (fields to include or exclude).
    pub projection: Option<Document>,
    /// Query vector for similarity search.
    pub vector: Option<Vec<f64>>,
    /// Whether to return `$similarity` with each document.
    pub include_similarity: Option<bool>,
}

impl FindOptions {
    /// Create new find options.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }
}

/// Builder for FindOptions.
#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Set the limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Set the skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Set the sort order.
    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Set the query vector.
    pub fn vector(mut self, vector: Vec<f64>) -> Self {
        self.options.vector = Some(vector);
        self
    }

    /// Request `$similarity` in returned documents.
    pub fn include_similarity(mut self, include: bool) -> Self {
        self.options.include_similarity = Some(include);
        self
    }

    /// Build the options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// An immutable, validated find query.
///
/// Shared by every cursor forked from the same `find` call.
#[derive(Debug, Clone)]
pub struct FindQuery {
    filter: Document,
    options: FindOptions,
}

impl FindQuery {
    /// Validate `filter` and `options` into a query.
    pub fn new(filter: Document, options: FindOptions) -> Result<Self> {
        if options.vector.is_some() && options.sort.is_some() {
            return Err(DataApiError::invalid_argument(
                "a vector search cannot be combined with an explicit sort",
            ));
        }
        if options.limit == Some(0) {
            return Err(DataApiError::invalid_argument("limit must be positive"));
        }
        if let Some(vector) = &options.vector {
            if vector.is_empty() {
                return Err(DataApiError::invalid_argument("vector cannot be empty"));
            }
        }
        if let Some(sort) = &options.sort {
            validate_sort(sort)?;
        }
        if let Some(projection) = &options.projection {
            validate_projection(projection)?;
        }
        let query = Self { filter, options };
        if query.options.skip.is_some() && query.is_paginated() {
            return Err(DataApiError::invalid_argument(
                "skip is only supported together with sort or vector",
            ));
        }
        Ok(query)
    }

    /// The filter.
    pub fn filter(&self) -> &Document {
        &self.filter
    }

    /// The options.
    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    /// The limit, if any.
    pub fn limit(&self) -> Option<u64> {
        self.options.limit
    }

    /// The skip, if any.
    pub fn skip(&self) -> Option<u64> {
        self.options.skip
    }

    /// Whether `$similarity` was requested.
    pub fn include_similarity(&self) -> bool {
        self.options.include_similarity.unwrap_or(false)
    }

    /// Whether this is a vector search.
    pub fn has_vector(&self) -> bool {
        self.options.vector.is_some()
    }

    /// Whether results can be streamed page by page.
    ///
    /// Sorted and vector queries are ranked over the whole result set, so
    /// their cursors materialize everything before yielding.
    pub fn is_paginated(&self) -> bool {
        self.options.sort.is_none() && self.options.vector.is_none()
    }

    /// Copy of this query with a different projection.
    pub fn with_projection(&self, projection: Option<Document>) -> Result<Self> {
        let mut options = self.options.clone();
        options.projection = projection;
        Self::new(self.filter.clone(), options)
    }

    /// The limit sent to the server.
    ///
    /// Skipped documents are dropped by the cursor, so the server has to
    /// return them on top of the limit.
    pub fn server_limit(&self) -> Option<u64> {
        self.options
            .limit
            .map(|limit| limit.saturating_add(self.options.skip.unwrap_or(0)))
    }

    /// Build the `find` command for one page.
    pub fn to_command(&self, page_state: Option<&str>) -> Result<JsonValue> {
        let mut find = serde_json::Map::new();
        find.insert("filter".to_string(), document_to_json(&self.filter)?);
        if let Some(projection) = &self.options.projection {
            find.insert("projection".to_string(), document_to_json(projection)?);
        }
        if let Some(vector) = &self.options.vector {
            find.insert(
                "sort".to_string(),
                serde_json::json!({ "$vector": vector_to_json(vector)? }),
            );
        } else if let Some(sort) = &self.options.sort {
            find.insert("sort".to_string(), document_to_json(sort)?);
        }

        let mut options = serde_json::Map::new();
        if let Some(limit) = self.server_limit() {
            options.insert("limit".to_string(), serde_json::json!(limit));
        }
        if self.include_similarity() {
            options.insert("includeSimilarity".to_string(), JsonValue::Bool(true));
        }
        if let Some(page_state) = page_state {
            options.insert("pageState".to_string(), JsonValue::String(page_state.to_string()));
        }
        if !options.is_empty() {
            find.insert("options".to_string(), JsonValue::Object(options));
        }

        Ok(serde_json::json!({ "find": find }))
    }
}

pub(crate) fn validate_sort(sort: &Document) -> Result<()> {
    for (field, direction) in sort {
        let valid = match direction {
            Bson::Int32(d) => *d == 1 || *d == -1,
            Bson::Int64(d) => *d == 1 || *d == -1,
            _ => false,
        };
        if !valid {
            return Err(DataApiError::invalid_argument(format!(
                "sort direction for '{field}' must be 1 or -1"
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_projection(projection: &Document) -> Result<()> {
    let mut mode: Option<bool> = None;
    for (field, value) in projection {
        let include = match value {
            Bson::Boolean(b) => *b,
            Bson::Int32(i) => *i != 0,
            Bson::Int64(i) => *i != 0,
            // slices and other operators do not pick a mode
            Bson::Document(_) => continue,
            other => {
                return Err(DataApiError::invalid_argument(format!(
                    "projection value for '{field}' must be a boolean or 0/1, got {other}"
                )))
            }
        };
        if field == "_id" {
            continue;
        }
        match mode {
            None => mode = Some(include),
            Some(m) if m != include => {
                return Err(DataApiError::invalid_argument(
                    "projection cannot mix inclusion and exclusion",
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
