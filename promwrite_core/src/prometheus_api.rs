use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::store::format_value;
use crate::METRIC_NAME_LABEL;

/// How long to wait for a query (or health check) to answer
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A `[timestamp, "value"]` pair as returned by the query api
pub type QueryValue = (f64, String);

#[derive(Debug, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<QueryData>,
    #[serde(rename = "errorType", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct QueryData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: QueryResultSet,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueryResultSet {
    /// Instant vectors and range vectors
    Series(Vec<QueryResult>),
    /// Scalars and strings
    Value(QueryValue),
}

impl Default for QueryResultSet {
    fn default() -> Self {
        QueryResultSet::Series(Vec::new())
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct QueryResult {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub value: Option<QueryValue>,
    #[serde(default)]
    pub values: Vec<QueryValue>,
}

/// The rendered outcome of a single query
#[derive(Debug, PartialEq)]
pub enum QueryReport {
    Failed {
        status: String,
        error: Option<String>,
    },
    Results(Vec<String>),
}

impl fmt::Display for QueryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryReport::Failed { status, error } => write!(
                f,
                "query returned status {:?}: {}",
                status,
                error.as_deref().unwrap_or("no error message")
            ),
            QueryReport::Results(lines) if lines.is_empty() => write!(f, "0 results"),
            QueryReport::Results(lines) => {
                write!(f, "{} results", lines.len())?;
                for line in lines {
                    write!(f, "\n  {}", line)?;
                }
                Ok(())
            }
        }
    }
}

/// Render each returned series as `name{labels}=value@timestamp`
pub fn render(response: &QueryResponse) -> QueryReport {
    if response.status != "success" {
        return QueryReport::Failed {
            status: response.status.clone(),
            error: response.error.clone(),
        };
    }

    let mut lines = Vec::new();
    match response.data.as_ref().map(|data| &data.result) {
        Some(QueryResultSet::Series(results)) => {
            for result in results {
                let name = result
                    .metric
                    .get(METRIC_NAME_LABEL)
                    .map(String::as_str)
                    .unwrap_or("");
                let labels = result
                    .metric
                    .iter()
                    .filter(|(label, _)| *label != METRIC_NAME_LABEL)
                    .map(|(label, value)| format!("{}={:?}", label, value))
                    .collect::<Vec<_>>()
                    .join(",");
                for (timestamp, value) in result.value.iter().chain(&result.values) {
                    lines.push(format!(
                        "{}{{{}}}={}@{}",
                        name,
                        labels,
                        value,
                        format_value(*timestamp)
                    ));
                }
            }
        }
        Some(QueryResultSet::Value((timestamp, value))) => {
            lines.push(format!("{}@{}", value, format_value(*timestamp)));
        }
        None => (),
    }
    QueryReport::Results(lines)
}

#[derive(Clone, Debug)]
pub struct PrometheusApi {
    base_url: String,
    timeout: Duration,
}

impl PrometheusApi {
    pub fn new(base_url: &str) -> Self {
        PrometheusApi {
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check the server is up; any answer other than "200 OK" is an error
    pub async fn healthy(&self) -> Result<()> {
        let request_url = format!("{}/-/healthy", self.base_url);
        let status = async_std::future::timeout(self.timeout, async {
            surf::get(&request_url)
                .await
                .map(|response| response.status())
                .map_err(|err| anyhow::anyhow!("in prometheus_api::healthy: {}", err))
        })
        .await
        .map_err(|_| anyhow::anyhow!("health check timed out after {:?}", self.timeout))??;
        if status != surf::StatusCode::Ok {
            return Err(anyhow::anyhow!("health check returned status {}", status));
        }
        Ok(())
    }

    /// Evaluates a PromQL instant query
    pub async fn query(&self, query: &str) -> Result<QueryResponse> {
        #[derive(Serialize)]
        struct Params<'a> {
            query: &'a str,
        }

        let request_url = format!("{}/api/v1/query", self.base_url);
        let request = surf::get(request_url)
            .query(&Params { query })
            .map_err(|err| anyhow::anyhow!("in prometheus_api::query: {}", err))?;
        let response = async_std::future::timeout(self.timeout, async {
            request
                .recv_json::<QueryResponse>()
                .await
                // Surf's error doesn't implement std::error::Error, so convert it to an error string
                .map_err(|err| anyhow::anyhow!("in prometheus_api::query: {}", err))
        })
        .await
        .map_err(|_| anyhow::anyhow!("query timed out after {:?}", self.timeout))??;
        Ok(response)
    }
}
