//! DataApiClient and its configuration.

use crate::bulk::DEFAULT_BULK_WRITE_CONCURRENCY;
use crate::db::Database;
use crate::error::{DataApiError, Result};
use crate::transport::{HttpTransport, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the API endpoint.
pub const ENV_API_ENDPOINT: &str = "ASTRA_DB_API_ENDPOINT";
/// Environment variable holding the application token.
pub const ENV_APPLICATION_TOKEN: &str = "ASTRA_DB_APPLICATION_TOKEN";
/// Environment variable holding the keyspace.
pub const ENV_KEYSPACE: &str = "ASTRA_DB_KEYSPACE";

/// Keyspace used when none is configured.
pub const DEFAULT_KEYSPACE: &str = "default_keyspace";
/// Path of the JSON API below the endpoint.
pub const DEFAULT_API_PATH: &str = "/api/json/v1";
/// Largest number of documents the server accepts in one `insertMany`.
pub const MAX_INSERT_MANY_CHUNK_SIZE: usize = 20;

/// Options for connecting to a Data API database.
#[derive(Clone)]
pub struct ClientOptions {
    /// Base URL of the database, e.g. `https://<id>-<region>.apps.astra.datastax.com`.
    pub api_endpoint: Option<String>,
    /// Application token sent with every request.
    pub token: Option<String>,
    /// Keyspace used by [`DataApiClient::database`].
    pub keyspace: String,
    /// Path of the JSON API below the endpoint.
    pub api_path: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Default number of in-flight operations for unordered bulk writes.
    pub bulk_write_concurrency: usize,
    /// Documents per `insertMany` request.
    pub insert_many_chunk_size: usize,
    /// Application name reported in the user agent.
    pub app_name: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            token: None,
            keyspace: DEFAULT_KEYSPACE.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            request_timeout_ms: 30_000,
            bulk_write_concurrency: DEFAULT_BULK_WRITE_CONCURRENCY,
            insert_many_chunk_size: MAX_INSERT_MANY_CHUNK_SIZE,
            app_name: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("api_endpoint", &self.api_endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("keyspace", &self.keyspace)
            .field("api_path", &self.api_path)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("bulk_write_concurrency", &self.bulk_write_concurrency)
            .field("insert_many_chunk_size", &self.insert_many_chunk_size)
            .field("app_name", &self.app_name)
            .finish()
    }
}

impl ClientOptions {
    /// Create a new ClientOptions with defaults.
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Read options from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`, which maps an environment variable
    /// name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut options = ClientOptions {
            api_endpoint: non_empty(ENV_API_ENDPOINT),
            token: non_empty(ENV_APPLICATION_TOKEN),
            ..ClientOptions::default()
        };
        if let Some(keyspace) = non_empty(ENV_KEYSPACE) {
            options.keyspace = keyspace;
        }
        options
    }

    /// Check the options are usable for a client.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self
            .api_endpoint
            .as_deref()
            .ok_or_else(|| DataApiError::config(format!("{ENV_API_ENDPOINT} is not set")))?;
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(DataApiError::config(format!(
                "api endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }
        if self.keyspace.is_empty() {
            return Err(DataApiError::config("keyspace cannot be empty"));
        }
        if self.bulk_write_concurrency == 0 {
            return Err(DataApiError::config("bulk_write_concurrency must be positive"));
        }
        if self.insert_many_chunk_size == 0
            || self.insert_many_chunk_size > MAX_INSERT_MANY_CHUNK_SIZE
        {
            return Err(DataApiError::config(format!(
                "insert_many_chunk_size must be between 1 and {MAX_INSERT_MANY_CHUNK_SIZE}"
            )));
        }
        Ok(())
    }

    /// User agent sent with every request.
    pub fn user_agent(&self) -> String {
        let base = format!("data-api-client/{}", crate::version());
        match &self.app_name {
            Some(app) => format!("{app} {base}"),
            None => base,
        }
    }
}

/// Builder for ClientOptions.
#[derive(Debug, Clone, Default)]
pub struct ClientOptionsBuilder {
    options: ClientOptions,
}

impl ClientOptionsBuilder {
    /// Set the API endpoint.
    pub fn api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.options.api_endpoint = Some(endpoint.into());
        self
    }

    /// Set the application token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.options.token = Some(token.into());
        self
    }

    /// Set the keyspace.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.options.keyspace = keyspace.into();
        self
    }

    /// Set the API path.
    pub fn api_path(mut self, path: impl Into<String>) -> Self {
        self.options.api_path = path.into();
        self
    }

    /// Set the request timeout.
    pub fn request_timeout_ms(mut self, timeout: u64) -> Self {
        self.options.request_timeout_ms = timeout;
        self
    }

    /// Set the default bulk write concurrency.
    pub fn bulk_write_concurrency(mut self, concurrency: usize) -> Self {
        self.options.bulk_write_concurrency = concurrency;
        self
    }

    /// Set the number of documents per `insertMany` request.
    pub fn insert_many_chunk_size(mut self, size: usize) -> Self {
        self.options.insert_many_chunk_size = size;
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.options.app_name = Some(name.into());
        self
    }

    /// Build the options.
    pub fn build(self) -> ClientOptions {
        self.options
    }
}

/// Options and transport shared by every handle derived from one client.
#[derive(Clone)]
pub(crate) struct Connection {
    pub(crate) options: Arc<ClientOptions>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Connection {
    /// URL for keyspace-level commands.
    pub(crate) fn keyspace_url(&self, keyspace: &str) -> String {
        let endpoint = self.options.api_endpoint.as_deref().unwrap_or_default();
        format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            self.options.api_path.trim_matches('/'),
            keyspace
        )
    }

    /// URL for collection-level commands.
    pub(crate) fn collection_url(&self, keyspace: &str, collection: &str) -> String {
        format!("{}/{}", self.keyspace_url(keyspace), collection)
    }
}

/// A client for a Data API database.
///
/// # Example
///
/// ```ignore
/// use data_api::{ClientOptions, DataApiClient};
///
/// #[tokio::main]
/// async fn main() -> data_api::Result<()> {
///     let client = DataApiClient::new(ClientOptions::from_env())?;
///     let db = client.database();
///     let names = db.list_collection_names().await?;
///     println!("{names:?}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DataApiClient {
    connection: Connection,
}

impl DataApiClient {
    /// Create a client that talks HTTP to `options.api_endpoint`.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let token = options
            .token
            .as_deref()
            .ok_or_else(|| DataApiError::config(format!("{ENV_APPLICATION_TOKEN} is not set")))?;
        let transport = HttpTransport::new(
            token,
            Duration::from_millis(options.request_timeout_ms),
            &options.user_agent(),
        )?;
        Self::with_transport(options, Arc::new(transport))
    }

    /// Create a client from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env())
    }

    /// Create a client that sends commands through `transport`.
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            connection: Connection {
                options: Arc::new(options),
                transport,
            },
        })
    }

    /// Get a handle to the configured keyspace.
    pub fn database(&self) -> Database {
        Database::new(self.connection.options.keyspace.clone(), self.connection.clone())
    }

    /// Get a handle to another keyspace.
    pub fn database_with_keyspace(&self, keyspace: &str) -> Database {
        Database::new(keyspace.to_string(), self.connection.clone())
    }

    /// Get the client options.
    pub fn options(&self) -> &ClientOptions {
        &self.connection.options
    }
}

impl fmt::Debug for DataApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataApiClient")
            .field("options", &self.connection.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_client_options_default() {
        let options = ClientOptions::default();
        assert!(options.api_endpoint.is_none());
        assert!(options.token.is_none());
        assert_eq!(options.keyspace, "default_keyspace");
        assert_eq!(options.api_path, "/api/json/v1");
        assert_eq!(options.request_timeout_ms, 30_000);
        assert_eq!(options.bulk_write_concurrency, 10);
        assert_eq!(options.insert_many_chunk_size, 20);
    }

    #[test]
    fn test_client_options_builder() {
        let options = ClientOptions::builder()
            .api_endpoint("https://db-id-us-east1.apps.example.com")
            .token("AstraCS:secret")
            .keyspace("vectors")
            .request_timeout_ms(5_000)
            .bulk_write_concurrency(4)
            .insert_many_chunk_size(5)
            .app_name("indexer")
            .build();

        assert_eq!(options.keyspace, "vectors");
        assert_eq!(options.request_timeout_ms, 5_000);
        assert_eq!(options.bulk_write_concurrency, 4);
        assert_eq!(options.insert_many_chunk_size, 5);
        assert!(options.validate().is_ok());
        assert!(options.user_agent().starts_with("indexer data-api-client/"));
    }

    #[test]
    fn test_from_lookup() {
        let options = ClientOptions::from_lookup(lookup_from(&[
            (ENV_API_ENDPOINT, "https://db.example.com"),
            (ENV_APPLICATION_TOKEN, "AstraCS:t"),
            (ENV_KEYSPACE, "ks1"),
        ]));
        assert_eq!(options.api_endpoint.as_deref(), Some("https://db.example.com"));
        assert_eq!(options.token.as_deref(), Some("AstraCS:t"));
        assert_eq!(options.keyspace, "ks1");
    }

    #[test]
    fn test_from_lookup_blank_keyspace_keeps_default() {
        let options = ClientOptions::from_lookup(lookup_from(&[(ENV_KEYSPACE, "  ")]));
        assert_eq!(options.keyspace, DEFAULT_KEYSPACE);
    }

    #[test]
    fn test_validate_errors() {
        assert!(matches!(
            ClientOptions::default().validate(),
            Err(DataApiError::Config(_))
        ));

        let bad_scheme = ClientOptions::builder().api_endpoint("db.example.com").build();
        assert!(bad_scheme.validate().is_err());

        let big_chunks = ClientOptions::builder()
            .api_endpoint("https://db.example.com")
            .insert_many_chunk_size(21)
            .build();
        assert!(big_chunks.validate().is_err());

        let no_workers = ClientOptions::builder()
            .api_endpoint("https://db.example.com")
            .bulk_write_concurrency(0)
            .build();
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn test_new_requires_token() {
        let options = ClientOptions::builder()
            .api_endpoint("https://db.example.com")
            .build();
        let err = DataApiClient::new(options).unwrap_err();
        assert!(err.to_string().contains(ENV_APPLICATION_TOKEN));
    }

    #[test]
    fn test_debug_redacts_token() {
        let options = ClientOptions::builder().token("AstraCS:very-secret").build();
        let debug = format!("{options:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_urls() {
        let client = DataApiClient::new(
            ClientOptions::builder()
                .api_endpoint("https://db.example.com/")
                .token("t")
                .build(),
        )
        .unwrap();
        assert_eq!(
            client.connection.keyspace_url("ks"),
            "https://db.example.com/api/json/v1/ks"
        );
        assert_eq!(
            client.connection.collection_url("ks", "docs"),
            "https://db.example.com/api/json/v1/ks/docs"
        );
        assert_eq!(client.database().name(), "default_keyspace");
        assert_eq!(client.database_with_keyspace("other").name(), "other");
    }
}
