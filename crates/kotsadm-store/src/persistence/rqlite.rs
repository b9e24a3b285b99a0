// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replicated store backend reached over the rqlite HTTP API.
//!
//! Writes go to `/db/execute` (batches with `?transaction`, so the cluster
//! applies them as one Raft log entry), reads to `/db/query` with the
//! configured consistency level, readiness to `/readyz`. Followers answer
//! writes with a redirect to the leader, which is followed explicitly so the
//! request body and method are preserved.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ExecResult, QueryResult, Statement, Store, Value, classify_message};
use crate::error::{Result, StatementError, StoreError};

const MAX_LEADER_REDIRECTS: usize = 3;

/// Read consistency level passed to `/db/query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConsistency {
    /// Read from the local node without any leader check.
    None,
    /// Read from the node that believes it is leader.
    Weak,
    /// Read through the Raft log (linearizable).
    #[default]
    Strong,
}

impl ReadConsistency {
    /// Query parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Weak => "weak",
            Self::Strong => "strong",
        }
    }
}

impl FromStr for ReadConsistency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "weak" => Ok(Self::Weak),
            "strong" => Ok(Self::Strong),
            other => Err(format!("unknown read consistency '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: Vec<ApiResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    rows_affected: u64,
    #[serde(default)]
    last_insert_id: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// Client handle to a replicated rqlite cluster.
#[derive(Clone)]
pub struct RqliteStore {
    client: reqwest::Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    consistency: ReadConsistency,
}

impl std::fmt::Debug for RqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RqliteStore")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("consistency", &self.consistency)
            .finish()
    }
}

impl RqliteStore {
    /// Create a client for `uri` (`http(s)://[user:password@]host:port`).
    ///
    /// Credentials embedded in the URI are sent as HTTP basic auth and
    /// stripped from the base URL. No request is made here.
    pub fn connect(uri: &str, consistency: ReadConsistency) -> Result<Self> {
        let mut base_url = Url::parse(uri)
            .map_err(|e| StoreError::validation("store_uri", format!("invalid URI: {}", e)))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(StoreError::validation(
                "store_uri",
                format!("unsupported scheme '{}'", base_url.scheme()),
            ));
        }

        let username = match base_url.username() {
            "" => None,
            user => Some(user.to_string()),
        };
        let password = base_url.password().map(str::to_string);
        // set_username/set_password only fail for cannot-be-a-base URLs, excluded above
        let _ = base_url.set_username("");
        let _ = base_url.set_password(None);

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            username,
            password,
            consistency,
        })
    }

    /// Base URL requests are sent to (credentials stripped).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, query: Option<&str>) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| StoreError::validation("store_uri", e.to_string()))?;
        url.set_query(query);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    /// POST statements, following leader redirects.
    async fn post(
        &self,
        path: &str,
        query: &str,
        statements: &[Statement],
    ) -> Result<ApiResponse> {
        let body: Vec<serde_json::Value> = statements.iter().map(statement_json).collect();
        let mut url = self.endpoint(path, Some(query))?;

        for _ in 0..=MAX_LEADER_REDIRECTS {
            let response = self
                .authorize(self.client.post(url.clone()).json(&body))
                .send()
                .await
                .map_err(|e| transport_error(path, e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        StoreError::unavailable(path, "redirect without Location header")
                    })?;
                let mut leader = Url::parse(location)
                    .or_else(|_| url.join(location))
                    .map_err(|e| StoreError::unavailable(path, e))?;
                leader.set_query(Some(query));
                debug!(leader = %leader, "Following redirect to cluster leader");
                url = leader;
                continue;
            }

            if status == StatusCode::SERVICE_UNAVAILABLE {
                let text = response_text(response).await;
                return Err(StoreError::NotReady(text));
            }

            if !status.is_success() {
                let text = response_text(response).await;
                return Err(classify_message(
                    path,
                    &format!("HTTP {}: {}", status.as_u16(), text),
                ));
            }

            let parsed: ApiResponse = response.json().await?;
            if let Some(error) = parsed.error {
                return Err(classify_message(path, &error));
            }
            return Ok(parsed);
        }

        Err(StoreError::unavailable(
            path,
            format!("more than {} leader redirects", MAX_LEADER_REDIRECTS),
        ))
    }
}

fn statement_json(statement: &Statement) -> serde_json::Value {
    let mut parts = Vec::with_capacity(statement.args.len() + 1);
    parts.push(serde_json::Value::String(statement.sql.clone()));
    parts.extend(statement.args.iter().map(|arg| match arg {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Value::from(*f),
        Value::Text(s) => serde_json::Value::String(s.clone()),
    }));
    serde_json::Value::Array(parts)
}

/// Body of an error response, or why it could not be read.
async fn response_text(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(text) => text.trim().to_string(),
        Err(e) => format!("<failed to read response body: {}>", e),
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::unavailable(operation, err)
    } else {
        StoreError::Http(err)
    }
}

fn is_unique_violation(message: &str) -> bool {
    message
        .to_ascii_lowercase()
        .contains("unique constraint failed")
}

#[async_trait]
impl Store for RqliteStore {
    fn backend_name(&self) -> &'static str {
        "rqlite"
    }

    async fn execute_one(&self, statement: Statement) -> Result<ExecResult> {
        let response = self
            .post("/db/execute", "transaction", std::slice::from_ref(&statement))
            .await?;
        let result = response.results.into_iter().next().unwrap_or_default();
        if let Some(error) = result.error {
            return Err(classify_message("execute", &error));
        }
        Ok(ExecResult {
            rows_affected: result.rows_affected,
            last_insert_id: result.last_insert_id,
        })
    }

    async fn execute_batch(&self, statements: Vec<Statement>) -> Result<Vec<ExecResult>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let total = statements.len();
        debug!(statements = total, "Executing transactional batch");
        let response = self.post("/db/execute", "transaction", &statements).await?;

        let errors: Vec<StatementError> = response
            .results
            .iter()
            .enumerate()
            .filter_map(|(index, r)| {
                r.error.as_ref().map(|message| StatementError {
                    index,
                    message: message.clone(),
                })
            })
            .collect();

        if !errors.is_empty() {
            warn!(
                statements = total,
                failed = errors.len(),
                "Transactional batch rejected"
            );
            if errors.iter().all(|e| is_unique_violation(&e.message)) {
                let joined = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(StoreError::Conflict(joined));
            }
            return Err(StoreError::BatchPartialFailure { total, errors });
        }

        Ok(response
            .results
            .into_iter()
            .map(|r| ExecResult {
                rows_affected: r.rows_affected,
                last_insert_id: r.last_insert_id,
            })
            .collect())
    }

    async fn query_one(&self, statement: Statement) -> Result<QueryResult> {
        let query = format!("level={}", self.consistency.as_str());
        let response = self
            .post("/db/query", &query, std::slice::from_ref(&statement))
            .await?;
        let result = response.results.into_iter().next().unwrap_or_default();
        if let Some(error) = result.error {
            return Err(classify_message("query", &error));
        }

        let values = result
            .values
            .iter()
            .map(|row| row.iter().map(Value::from_json).collect())
            .collect();
        Ok(QueryResult::new(result.columns, values))
    }

    async fn ping(&self) -> Result<()> {
        let url = self.endpoint("/readyz", None)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| transport_error("readyz", e))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::SERVICE_UNAVAILABLE => {
                let text = response_text(response).await;
                Err(StoreError::NotReady(text))
            }
            status => Err(StoreError::unavailable(
                "readyz",
                format!("unexpected HTTP status {}", status.as_u16()),
            )),
        }
    }
}
