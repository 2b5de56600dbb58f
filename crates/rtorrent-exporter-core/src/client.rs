//! Blocking XML-RPC client for the rTorrent control interface.
//!
//! Implements [`DownloadsSource`] over HTTP(S):
//! - `download_list` with a view name for the per-state info-hash lists,
//! - `d.multicall2` over the `active` view for the batched detail rows.
//!
//! Timeouts and TLS policy are fixed at construction; every scrape issues
//! fresh blocking requests with no retries or caching.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::debug;

use crate::collector::{DetailRow, DownloadsSource, SourceError, StateList};
use crate::xmlrpc::{self, Value, XmlRpcError};

/// The rTorrent view backing the batched detail query.
const ACTIVE_VIEW: &str = "active";

/// Client options beyond the endpoint URL.
#[derive(Debug, Clone, Default)]
pub struct ClientOpts {
    /// HTTP Basic authentication, applied when both parts are set.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout (connect and read).
    pub timeout: Duration,
    /// Accept TLS certificates that fail verification.
    pub insecure: bool,
}

/// XML-RPC client for one rTorrent endpoint.
#[derive(Debug)]
pub struct RtorrentClient {
    url: String,
    username: Option<String>,
    password: Option<String>,
    http: Client,
}

impl RtorrentClient {
    /// Creates a client for the XML-RPC endpoint at `url`.
    ///
    /// Fails if the URL does not parse or the HTTP client cannot be built.
    /// Must not be called from inside an async runtime: the blocking client
    /// owns its own I/O driver.
    pub fn new(url: &str, opts: ClientOpts) -> Result<Self, SourceError> {
        reqwest::Url::parse(url)
            .map_err(|e| SourceError::Transport(format!("invalid rTorrent URL {:?}: {}", url, e)))?;

        let mut builder = Client::builder().danger_accept_invalid_certs(opts.insecure);
        if opts.timeout > Duration::ZERO {
            builder = builder.timeout(opts.timeout);
        }
        let http = builder
            .build()
            .map_err(|e| SourceError::Transport(format!("cannot build HTTP client: {}", e)))?;

        let auth_enabled = opts.username.is_some() && opts.password.is_some();
        Ok(Self {
            url: url.to_string(),
            username: auth_enabled.then(|| opts.username.unwrap_or_default()),
            password: auth_enabled.then(|| opts.password.unwrap_or_default()),
            http,
        })
    }

    /// Issues one XML-RPC call and parses the response value.
    fn call(&self, method: &str, params: &[Value]) -> Result<Value, SourceError> {
        debug!(method, url = %self.url, "rTorrent XML-RPC call");

        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(xmlrpc::format_request(method, params));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request
            .send()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SourceError::Transport(format!(
                "unexpected HTTP status {} from {}",
                status, self.url
            )));
        }
        let body = response
            .text()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        xmlrpc::parse_response(&body).map_err(|e| match e {
            XmlRpcError::Fault { code, message } => SourceError::Fault { code, message },
            XmlRpcError::Parse(msg) => SourceError::Unexpected(msg),
        })
    }
}

impl DownloadsSource for RtorrentClient {
    fn state_list(&self, list: StateList) -> Result<Vec<String>, SourceError> {
        let value = self.call(
            "download_list",
            &[
                Value::String(String::new()),
                Value::String(list.view().to_string()),
            ],
        )?;
        parse_hash_list(value)
    }

    fn download_details(&self, selectors: &[&str]) -> Result<Vec<DetailRow>, SourceError> {
        let mut params = Vec::with_capacity(selectors.len() + 2);
        params.push(Value::String(String::new()));
        params.push(Value::String(ACTIVE_VIEW.to_string()));
        params.extend(selectors.iter().map(|s| Value::String(s.to_string())));

        let value = self.call("d.multicall2", &params)?;
        parse_detail_rows(value)
    }
}

/// Interprets a `download_list` result as a list of info hashes.
fn parse_hash_list(value: Value) -> Result<Vec<String>, SourceError> {
    let Value::Array(items) = value else {
        return Err(SourceError::Unexpected(format!(
            "download_list returned a {}, expected array",
            value.type_name()
        )));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(hash) => Ok(hash),
            other => Err(SourceError::Unexpected(format!(
                "download_list entry is a {}, expected string",
                other.type_name()
            ))),
        })
        .collect()
}

/// Interprets a `d.multicall2` result as one row per download.
fn parse_detail_rows(value: Value) -> Result<Vec<DetailRow>, SourceError> {
    let Value::Array(rows) = value else {
        return Err(SourceError::Unexpected(format!(
            "d.multicall2 returned a {}, expected array",
            value.type_name()
        )));
    };
    rows.into_iter()
        .map(|row| match row {
            Value::Array(values) => Ok(values),
            other => Err(SourceError::Unexpected(format!(
                "d.multicall2 row is a {}, expected array",
                other.type_name()
            ))),
        })
        .collect()
}
