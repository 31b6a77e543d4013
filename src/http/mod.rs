//! [`CouchTransport`] over HTTP, backed by `reqwest`.

/// This module contains the view query string builder.
pub mod query;

use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

use crate::config::CouchConfig;
use crate::document::{Document, WriteOutcome};
use crate::errors::{CouchError, Result, is_retryable_status};
use crate::logger::Logger;
use crate::row::ViewQueryResponse;
use crate::transport::{CouchTransport, RowByteStream, ViewQueryOptions};

pub use query::{MAX_URL_LENGTH, ViewRequest, build_view_request};

/// Error body the store sends with non-2xx answers.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Maps a `reqwest` failure onto the crate's error taxonomy.
///
/// Requests that never produced a response (connection refused, timeout,
/// request not sent) are transient with status 503.
pub fn classify_error(err: reqwest::Error) -> CouchError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        CouchError::Transient {
            reason: err.to_string(),
            status: Some(503),
        }
    } else if let Some(status) = err.status().map(|s| s.as_u16()).filter(|s| is_retryable_status(*s)) {
        CouchError::retryable_status(err.to_string(), status)
    } else {
        CouchError::Http(err)
    }
}

/// A database reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: String,
    credentials: Option<(String, Option<String>)>,
    logger: Logger,
}

impl HttpTransport {
    /// Builds a transport for the database in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CouchError::Config`] for an invalid configuration and
    /// [`CouchError::Http`] if the client cannot be built.
    pub fn new(config: &CouchConfig, logger: Logger) -> Result<Self> {
        config.validate()?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(CouchError::Http)?;
        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));
        Ok(Self {
            client,
            base: config.base_url().to_string(),
            credentials,
            logger,
        })
    }

    /// The database URL requests are made against.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_deref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(classify_error)
    }

    fn document_url(&self, id: &str) -> Result<Url> {
        let mut url = query::database_url(&self.base, "")?;
        url.path_segments_mut()
            .map_err(|_| CouchError::Config(format!("{} cannot hold a document path", self.base)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    /// Turns a non-success answer into an error, reading its body for the
    /// message.
    async fn status_error(&self, response: Response) -> CouchError {
        let status = response.status().as_u16();
        let reason = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        if is_retryable_status(status) {
            self.logger.debug(format_args!("Retryable status {} from the store", status));
            CouchError::retryable_status(reason, status)
        } else {
            CouchError::UnexpectedStatus { status, reason }
        }
    }
}

impl CouchTransport for HttpTransport {
    async fn put_document(&self, doc: &Document) -> Result<WriteOutcome> {
        let url = self.document_url(&doc.id)?;
        let response = self.send(self.request(Method::PUT, url).json(doc)).await?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(classify_error);
        }
        if is_retryable_status(status.as_u16()) {
            return Err(self.status_error(response).await);
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        self.logger.debug(format_args!(
            "Write of {} rejected with status {}: {:?}",
            doc.id, status, body.error
        ));
        Ok(WriteOutcome {
            ok: Some(false),
            id: Some(doc.id.clone()),
            rev: None,
            error: Some(body.error.unwrap_or_else(|| status.as_u16().to_string())),
            reason: body.reason,
        })
    }

    async fn bulk_get(&self, ids: &[String], include_docs: bool) -> Result<ViewQueryResponse> {
        let mut url = query::database_url(&self.base, "_all_docs")?;
        url.query_pairs_mut()
            .append_pair("include_docs", if include_docs { "true" } else { "false" });
        let request = self
            .request(Method::POST, url)
            .json(&json!({ "keys": ids }));
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        response.json().await.map_err(classify_error)
    }

    async fn write_bulk(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        let url = query::database_url(&self.base, "_bulk_docs")?;
        let request = self
            .request(Method::POST, url)
            .json(&json!({ "docs": docs }));
        let response = self.send(request).await?;
        if response.status() != StatusCode::CREATED {
            return Err(self.status_error(response).await);
        }
        response.json().await.map_err(classify_error)
    }

    async fn open_query_stream(&self, view: &str, options: &ViewQueryOptions) -> Result<RowByteStream> {
        let ViewRequest { url, body } = build_view_request(&self.base, view, options)?;
        let request = match body {
            Some(body) => self.request(Method::POST, url).json(&body),
            None => self.request(Method::GET, url),
        };
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(classify_error));
        Ok(Box::pin(stream))
    }
}
