use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::bulk::{BulkDictionaryResolver, BulkWriter, Snapshot};
use crate::config::{CouchConfig, RebindOptions};
use crate::document::{Document, WriteOutcome};
use crate::errors::{CouchError, Result};
#[cfg(feature = "http")]
use crate::http::HttpTransport;
use crate::logger::Logger;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::row::{Row, ValidatedRow, ViewQueryResponse};
use crate::stream::RowStreamProcessor;
use crate::transaction::{PhaseHook, TransactionCoordinator};
use crate::transport::{CouchTransport, ViewQueryOptions};

/// Sofabed Prelude
pub mod prelude {
    pub use crate::bulk::*;
    pub use crate::config::*;
    pub use crate::document::*;
    pub use crate::errors::*;
    pub use crate::logger::*;
    pub use crate::retry::*;
    pub use crate::row::*;
    pub use crate::transaction::*;
    pub use crate::transport::*;
    pub use crate::*;
}

/// The main entry point: one database, its settings, and a logger.
///
/// Cloning is cheap and shares the transport.
pub struct Couch<T: CouchTransport> {
    /// The request plumbing all operations go through.
    transport: Arc<T>,
    config: CouchConfig,
    logger: Logger,
    /// Wraps every operation when `bind_with_retry` is set.
    retry: RetryExecutor,
    /// Observer handed to every transaction coordinator.
    phase_hook: Option<PhaseHook>,
}

impl<T: CouchTransport> Clone for Couch<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            logger: self.logger.clone(),
            retry: self.retry.clone(),
            phase_hook: self.phase_hook.clone(),
        }
    }
}

#[cfg(feature = "http")]
impl Couch<HttpTransport> {
    /// Connects to the database in `config` over HTTP.
    ///
    /// The logger is chosen by [`CouchConfig::default_logger`].
    pub fn connect(config: CouchConfig) -> Result<Self> {
        let logger = config.default_logger();
        Self::connect_with_logger(config, logger)
    }

    pub fn connect_with_logger(config: CouchConfig, logger: Logger) -> Result<Self> {
        let transport = HttpTransport::new(&config, logger.clone())?;
        Self::new(transport, config, logger)
    }
}

impl<T: CouchTransport> Couch<T> {
    /// Creates a handle over any transport.
    ///
    /// # Errors
    ///
    /// Returns [`CouchError::Config`] if `config` does not validate.
    pub fn new(transport: T, config: CouchConfig, logger: Logger) -> Result<Self> {
        Self::from_shared(Arc::new(transport), config, logger)
    }

    /// Like [`new`](Self::new), for a transport that is already shared.
    pub fn from_shared(transport: Arc<T>, config: CouchConfig, logger: Logger) -> Result<Self> {
        config.validate()?;
        let retry = RetryExecutor::new(config.retry_policy(), logger.clone());
        Ok(Self {
            transport,
            config,
            logger,
            retry,
            phase_hook: None,
        })
    }

    pub fn config(&self) -> &CouchConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns a handle with overridden settings on the same transport.
    pub fn with_options(&self, options: &RebindOptions) -> Result<Self> {
        let config = self.config.rebind(options);
        let mut couch = Self::from_shared(Arc::clone(&self.transport), config, self.logger.clone())?;
        couch.phase_hook = self.phase_hook.clone();
        Ok(couch)
    }

    /// Reports the steps of every transaction run through this handle.
    pub fn with_phase_hook(mut self, hook: PhaseHook) -> Self {
        self.phase_hook = Some(hook);
        self
    }

    fn resolver(&self) -> BulkDictionaryResolver<T> {
        BulkDictionaryResolver::new(Arc::clone(&self.transport), self.logger.clone())
    }

    fn writer(&self) -> BulkWriter<T> {
        BulkWriter::new(Arc::clone(&self.transport), self.logger.clone())
    }

    async fn retrying<F, Fut, R>(&self, mut operation: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if self.config.bind_with_retry {
            self.retry.execute(operation).await
        } else {
            operation().await
        }
    }

    /// Reads a single document.
    ///
    /// # Returns
    ///
    /// `None` for a missing or deleted document, unless
    /// `throw_on_get_not_found` is set, in which case that is a
    /// [`CouchError::NotFound`].
    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let ids = [id.to_string()];
        let response = self
            .retrying(|| self.transport.bulk_get(&ids, true))
            .await?;
        let row = response.rows.into_iter().next().unwrap_or_default();
        match row.document() {
            Some(doc) if row.error.is_none() => doc.map(Some),
            _ if self.config.throw_on_get_not_found => Err(CouchError::NotFound {
                id: id.to_string(),
                reason: row.error.unwrap_or_else(|| "deleted".to_string()),
            }),
            _ => Ok(None),
        }
    }

    /// Reads `ids` with their documents, unprocessed.
    pub async fn bulk_get_raw(&self, ids: &[String]) -> Result<ViewQueryResponse> {
        let resolver = self.resolver();
        self.retrying(|| resolver.bulk_get_raw(ids)).await
    }

    /// Reads `ids` and deserializes the documents into `D`; documents that
    /// do not fit are reported in the row's `error`.
    pub async fn bulk_get_validated<D: DeserializeOwned>(
        &self,
        ids: &[String],
    ) -> Result<Vec<ValidatedRow<D>>> {
        let resolver = self.resolver();
        self.retrying(|| resolver.bulk_get_validated::<D>(ids)).await
    }

    /// Reads `ids` into a [`Snapshot`] of found and missing documents.
    pub async fn bulk_get_dictionary(&self, ids: &[String]) -> Result<Snapshot> {
        let resolver = self.resolver();
        self.retrying(|| resolver.resolve(ids)).await
    }

    /// Saves `docs` in one bulk write.
    ///
    /// # Errors
    ///
    /// [`CouchError::NoDocs`] for an empty `docs`. Per-document failures are
    /// reported in the returned outcomes, not as an error.
    pub async fn bulk_save(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        let writer = self.writer();
        self.retrying(|| writer.write_nonempty(docs)).await
    }

    /// Deletes the existing documents among `ids`.
    pub async fn bulk_remove(&self, ids: &[String]) -> Result<Vec<WriteOutcome>> {
        let resolver = self.resolver();
        let writer = self.writer();
        self.retrying(|| writer.remove(&resolver, ids)).await
    }

    /// Saves `docs` all-or-nothing under the transaction `transaction_id`.
    ///
    /// See [`TransactionCoordinator`] for the protocol. The whole
    /// transaction is never re-issued; only the transaction record writes
    /// and the revision snapshot are retried, using
    /// `transaction_max_retries`.
    pub async fn bulk_save_transaction(
        &self,
        transaction_id: &str,
        docs: Vec<Document>,
    ) -> Result<Vec<WriteOutcome>> {
        let policy = if self.config.bind_with_retry {
            self.config.transaction_retry_policy()
        } else {
            RetryPolicy::none()
        };
        let mut coordinator = TransactionCoordinator::new(
            Arc::clone(&self.transport),
            RetryExecutor::new(policy, self.logger.clone()),
            self.logger.clone(),
        );
        if let Some(hook) = &self.phase_hook {
            coordinator = coordinator.with_phase_hook(Arc::clone(hook));
        }
        coordinator.execute(transaction_id, docs).await
    }

    /// Streams the rows of `view` to `on_row`, one at a time.
    ///
    /// Opening the query is retried; once rows are flowing, a failure ends
    /// the stream. Returns the number of rows delivered.
    pub async fn query_stream<F, E>(
        &self,
        view: &str,
        options: &ViewQueryOptions,
        on_row: F,
    ) -> Result<usize>
    where
        F: FnMut(Row) -> std::result::Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.logger.info(format_args!("Starting stream query on {}", view));
        let body = self
            .retrying(|| self.transport.open_query_stream(view, options))
            .await?;
        RowStreamProcessor::new(self.logger.clone())
            .process(body, on_row)
            .await
    }
}
