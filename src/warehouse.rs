use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::TokenSource;
use crate::error::{NotifierError, Result};
use crate::types::Config;

const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// A query with named `DATE` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub date_params: Vec<(String, String)>,
}

/// Rows returned by the warehouse, cells in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResult>;
}

pub struct BigQueryClient {
    client: reqwest::Client,
    project: Option<String>,
    token: TokenSource,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Row {
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: Value,
}

impl BigQueryClient {
    pub fn new(project: impl Into<String>, token: TokenSource) -> Self {
        Self {
            client: reqwest::Client::new(),
            project: Some(project.into()),
            token,
            base_url: BIGQUERY_BASE_URL.to_string(),
        }
    }

    /// Bill queries to `GCP_PROJECT`, falling back to the project that
    /// qualifies the view name.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            project: cfg.gcp_project.clone().or_else(|| project_from_view(&cfg.source_view)),
            token: TokenSource::from_config(cfg),
            base_url: BIGQUERY_BASE_URL.to_string(),
        }
    }

    /// Point the client at another API root (used against local mocks).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(request: &QueryRequest) -> Value {
        let params: Vec<Value> = request.date_params
            .iter()
            .map(|(name, value)| json!({
                "name": name,
                "parameterType": {"type": "DATE"},
                "parameterValue": {"value": value},
            }))
            .collect();
        json!({
            "query": request.sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": params,
        })
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<QueryResponse> {
        let res = builder
            .send()
            .await
            .map_err(|e| NotifierError::Fetch(format!("query request failed: {}", e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(NotifierError::Fetch(format!("BigQuery returned {}: {}", status, body)));
        }
        res.json()
            .await
            .map_err(|e| NotifierError::Fetch(format!("invalid query response: {}", e)))
    }
}

/// `project.dataset.view` names carry their project.
pub fn project_from_view(view: &str) -> Option<String> {
    let parts: Vec<&str> = view.split('.').collect();
    match parts.as_slice() {
        [project, _, _] => Some(project.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        let project = self.project.as_deref().ok_or_else(|| {
            NotifierError::Configuration(
                "GCP_PROJECT is not set and OUTLIER_VIEW is not project-qualified".to_string(),
            )
        })?;
        let token = self.token
            .token(&self.client)
            .await
            .map_err(|e| NotifierError::Fetch(format!("{:#}", e)))?;
        let url = format!("{}/projects/{}/queries", self.base_url, project);
        let mut response = self.send(
            self.client
                .post(&url)
                .bearer_auth(&token)
                .json(&Self::request_body(request)),
        ).await?;

        let mut result = QueryResult::default();
        loop {
            if result.columns.is_empty() {
                if let Some(schema) = response.schema.take() {
                    result.columns = schema.fields.into_iter().map(|f| f.name).collect();
                }
            }
            result.rows.extend(
                response.rows
                    .drain(..)
                    .map(|row| row.f.into_iter().map(|cell| cell.v).collect()),
            );

            if response.job_complete && response.page_token.is_none() {
                break;
            }

            // Incomplete jobs and further pages are both read through getQueryResults
            let job = response.job_reference.as_ref().ok_or_else(|| {
                NotifierError::Fetch("query response has no job reference".to_string())
            })?;
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(location) = &job.location {
                params.push(("location", location.clone()));
            }
            if let Some(page_token) = &response.page_token {
                params.push(("pageToken", page_token.clone()));
            }
            let url = format!("{}/projects/{}/queries/{}", self.base_url, project, job.job_id);
            debug!(job_id = %job.job_id, "fetching further query results");
            let next = self.send(self.client.get(&url).bearer_auth(&token).query(&params)).await?;
            // Keep the job reference when a follow-up page omits it
            let job_reference = next.job_reference.or(response.job_reference.take());
            response = QueryResponse { job_reference, ..next };
        }

        debug!(rows = result.rows.len(), "query finished");
        Ok(result)
    }
}
