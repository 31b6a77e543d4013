use reqwest::Url;
use serde_json::{Value, json};

use crate::errors::{CouchError, Result};
use crate::transport::ViewQueryOptions;

/// Longest URL a `keys` filter may produce before it moves into the body.
pub const MAX_URL_LENGTH: usize = 2000;

/// A view request ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRequest {
    pub url: Url,
    /// `Some` when the request must be a `POST` carrying `{ "keys": [...] }`.
    pub body: Option<Value>,
}

/// Resolves `path` (e.g. `_all_docs` or `_design/app/_view/by_type`)
/// against the database URL `base`.
pub fn database_url(base: &str, path: &str) -> Result<Url> {
    let raw = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    };
    Url::parse(&raw).map_err(|e| CouchError::Config(format!("invalid url {raw}: {e}")))
}

/// Encodes everything in `options` except `keys` as query pairs.
pub fn query_pairs(options: &ViewQueryOptions) -> Result<Vec<(&'static str, String)>> {
    let mut pairs = Vec::new();
    for (name, value) in [
        ("key", &options.key),
        ("startkey", &options.startkey),
        ("endkey", &options.endkey),
    ] {
        if let Some(value) = value {
            pairs.push((name, serde_json::to_string(value)?));
        }
    }
    for (name, flag) in [
        ("reduce", options.reduce),
        ("group", options.group),
        ("descending", options.descending),
        ("include_docs", options.include_docs),
    ] {
        if let Some(flag) = flag {
            pairs.push((name, flag.to_string()));
        }
    }
    if let Some(level) = options.group_level {
        pairs.push(("group_level", level.to_string()));
    }
    if let Some(stale) = &options.stale {
        pairs.push(("stale", stale.clone()));
    }
    if let Some(limit) = options.limit {
        pairs.push(("limit", limit.to_string()));
    }
    if let Some(skip) = options.skip {
        pairs.push(("skip", skip.to_string()));
    }
    Ok(pairs)
}

/// Builds the request for querying `view` with `options`.
///
/// `keys` are sent as a JSON query parameter while the URL stays within
/// [`MAX_URL_LENGTH`]; beyond that the request switches to a `POST` body.
pub fn build_view_request(base: &str, view: &str, options: &ViewQueryOptions) -> Result<ViewRequest> {
    let mut url = database_url(base, view)?;
    let pairs = query_pairs(options)?;
    if !pairs.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
    }

    let Some(keys) = &options.keys else {
        return Ok(ViewRequest { url, body: None });
    };
    let mut with_keys = url.clone();
    with_keys
        .query_pairs_mut()
        .append_pair("keys", &serde_json::to_string(keys)?);
    if with_keys.as_str().len() <= MAX_URL_LENGTH {
        Ok(ViewRequest {
            url: with_keys,
            body: None,
        })
    } else {
        Ok(ViewRequest {
            url,
            body: Some(json!({ "keys": keys })),
        })
    }
}
