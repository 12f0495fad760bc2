use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Method};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::model::{DependencyTable, RevisionId};

pub const CACHE_CONTROL: &str = "Cache-control";
pub const PARENT_REVISION: &str = "X-Restbase-ParentRevision";
pub const RESTBASE_MODE: &str = "X-Restbase-Mode";

/// One invalidation signal. Always a GET that asks RESTBase to bypass its
/// cache and regenerate the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
}

impl InvalidationRequest {
    fn no_cache(url: String) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: vec![(CACHE_CONTROL, "no-cache".to_string())],
        }
    }

    /// Refresh of a single edited page. The parent revision lets RESTBase
    /// reuse expansions from the previous render.
    pub fn page_edit(url: String, parent: Option<RevisionId>) -> Self {
        let mut req = Self::no_cache(url);
        if let Some(parent) = parent {
            req.headers.push((PARENT_REVISION, parent.to_string()));
        }
        req
    }

    pub fn page_batch(url: String, table: DependencyTable) -> Self {
        let mut req = Self::no_cache(url);
        req.headers
            .push((RESTBASE_MODE, table.restbase_mode().to_string()));
        req
    }

    pub fn revision(url: String) -> Self {
        Self::no_cache(url)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl RequestOutcome {
    pub fn ok(status: u16) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    pub fn failed(status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }
}

/// Executes a set of requests concurrently and reports one outcome per
/// request, in request order.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn run_multi(
        &self,
        requests: Vec<InvalidationRequest>,
        concurrency: usize,
    ) -> Vec<RequestOutcome>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { http })
    }

    async fn execute(&self, req: InvalidationRequest) -> RequestOutcome {
        let mut builder = self.http.request(req.method.clone(), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(*name, value);
        }
        match builder.send().await {
            Ok(res) if res.status().is_success() => {
                debug!(url = %req.url, status = %res.status(), "invalidation sent");
                RequestOutcome::ok(res.status().as_u16())
            }
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                RequestOutcome::failed(
                    Some(status.as_u16()),
                    format!("restbase error {}: {}", status, body),
                )
            }
            Err(err) => RequestOutcome::failed(None, err.to_string()),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn run_multi(
        &self,
        requests: Vec<InvalidationRequest>,
        concurrency: usize,
    ) -> Vec<RequestOutcome> {
        stream::iter(requests)
            .map(|req| self.execute(req))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalidation of {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("transport returned {got} outcomes for {expected} requests")]
    MissingOutcomes { expected: usize, got: usize },
}

/// Sends one job's worth of invalidation requests.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn HttpTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Issue every request with parallelism equal to the batch size and
    /// report the first failure in request order.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn dispatch(&self, requests: Vec<InvalidationRequest>) -> Result<(), DispatchError> {
        if requests.is_empty() {
            return Ok(());
        }
        let expected = requests.len();
        let urls: Vec<String> = requests.iter().map(|r| r.url.clone()).collect();
        let outcomes = self.transport.run_multi(requests, expected).await;

        for (url, outcome) in urls.iter().zip(outcomes.iter()) {
            if let Some(message) = &outcome.error {
                warn!(%url, status = ?outcome.status, %message, "invalidation request failed");
                return Err(DispatchError::Request {
                    url: url.clone(),
                    message: message.clone(),
                });
            }
        }
        if outcomes.len() < expected {
            return Err(DispatchError::MissingOutcomes {
                expected,
                got: outcomes.len(),
            });
        }
        Ok(())
    }
}
