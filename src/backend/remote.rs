//! Remote libSQL Client
//!
//! Low-level HTTP client for the primary, speaking the Hrana-over-HTTP
//! `v2/pipeline` protocol. Owns the client-side query log.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{Rows, SqlBackend, Value};
use crate::error::{Error, Result};
use crate::log::QueryLog;

/// HTTP client for a remote libSQL primary
pub struct RemoteClient {
    http: reqwest::Client,
    pipeline_url: String,
    auth_token: Option<String>,
    log: QueryLog,
}

impl RemoteClient {
    /// Create a client for `endpoint` (already rewritten to http/https)
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            pipeline_url: format!("{}/v2/pipeline", endpoint.trim_end_matches('/')),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            log: QueryLog::new(),
        })
    }

    pub fn pipeline_url(&self) -> &str {
        &self.pipeline_url
    }

    /// Run one statement in a fresh stream and close it
    async fn run(&self, sql: &str, params: &[Value], want_rows: bool) -> Result<StmtResult> {
        let body = PipelineRequest::single(sql, params, want_rows);

        let mut request = self.http.post(&self.pipeline_url).json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!("HTTP {}: {}", status, text)));
        }

        let pipeline: PipelineResponse = response.json().await?;
        let result = pipeline.into_execute_result()?;
        self.log.record(sql, params, start.elapsed()).await;
        Ok(result)
    }
}

#[async_trait::async_trait]
impl SqlBackend for RemoteClient {
    fn kind(&self) -> &'static str {
        "primary"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = self.run(sql, params, false).await?;
        Ok(result.affected_row_count)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        self.run(sql, params, true).await?.into_rows()
    }

    fn query_log(&self) -> Option<&QueryLog> {
        Some(&self.log)
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct PipelineRequest {
    baton: Option<String>,
    requests: Vec<StreamRequest>,
}

impl PipelineRequest {
    fn single(sql: &str, params: &[Value], want_rows: bool) -> Self {
        Self {
            baton: None,
            requests: vec![
                StreamRequest::Execute {
                    stmt: Stmt {
                        sql: sql.to_string(),
                        args: params.iter().map(HranaValue::from).collect(),
                        want_rows,
                    },
                },
                StreamRequest::Close,
            ],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest {
    Execute { stmt: Stmt },
    Close,
}

#[derive(Debug, Serialize)]
struct Stmt {
    sql: String,
    args: Vec<HranaValue>,
    want_rows: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HranaValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl From<&Value> for HranaValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => HranaValue::Null,
            Value::Integer(v) => HranaValue::Integer { value: v.to_string() },
            Value::Real(v) => HranaValue::Float { value: *v },
            Value::Text(v) => HranaValue::Text { value: v.clone() },
            Value::Blob(v) => HranaValue::Blob {
                base64: STANDARD_NO_PAD.encode(v),
            },
        }
    }
}

impl TryFrom<HranaValue> for Value {
    type Error = Error;

    fn try_from(value: HranaValue) -> Result<Self> {
        Ok(match value {
            HranaValue::Null => Value::Null,
            HranaValue::Integer { value } => Value::Integer(value.parse().map_err(|_| {
                Error::Remote(format!("invalid integer value '{}'", value))
            })?),
            HranaValue::Float { value } => Value::Real(value),
            HranaValue::Text { value } => Value::Text(value),
            HranaValue::Blob { base64 } => Value::Blob(
                STANDARD_NO_PAD
                    .decode(base64.trim_end_matches('='))
                    .map_err(|e| Error::Remote(format!("invalid blob value: {}", e)))?,
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    results: Vec<StreamResult>,
}

impl PipelineResponse {
    fn into_execute_result(self) -> Result<StmtResult> {
        let first = self
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Error::Remote("empty pipeline response".into()))?;

        match first {
            StreamResult::Ok {
                response: StreamResponse::Execute { result },
            } => Ok(result),
            StreamResult::Ok { .. } => Err(Error::Remote("unexpected pipeline response".into())),
            StreamResult::Error { error } => Err(Error::QueryExecution(match error.code {
                Some(code) => format!("{} ({})", error.message, code),
                None => error.message,
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: HranaError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResponse {
    Execute { result: StmtResult },
    Close,
}

#[derive(Debug, Deserialize)]
struct HranaError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StmtResult {
    #[serde(default)]
    cols: Vec<Col>,
    #[serde(default)]
    rows: Vec<Vec<HranaValue>>,
    #[serde(default)]
    affected_row_count: u64,
}

#[derive(Debug, Deserialize)]
struct Col {
    #[serde(default)]
    name: Option<String>,
}

impl StmtResult {
    fn into_rows(self) -> Result<Rows> {
        let columns = self
            .cols
            .into_iter()
            .map(|c| c.name.unwrap_or_default())
            .collect();

        let rows = self
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::try_from).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;

        Ok(Rows { columns, rows })
    }
}
