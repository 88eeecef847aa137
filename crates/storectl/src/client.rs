use crate::config::{Config, ExecSql};
use crate::endpoint::{self, Endpoint, ErrorDetail, Filter, Select, Selected};
use serde_json::Value;
use std::fmt::{self, Debug};
use std::time::Duration;

/// Client of a PostgREST data endpoint. Raw SQL is executed through a
/// database function exposed as an RPC, and selects map onto PostgREST's
/// table API.
#[derive(Clone)]
pub struct Client {
    // PostgREST client.
    pg_client: postgrest::Postgrest,
    // HTTP client used for requests which the PostgREST client can't issue itself.
    http_client: reqwest::Client,
    // RPC function and parameter which execute raw SQL.
    exec_sql: ExecSql,
    // Timeout of each individual call, if any.
    timeout: Option<Duration>,
    // Rows requested per page of a select.
    page_size: usize,
}

impl Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Postgrest keeps all of its members private.
        f.debug_struct("storectl::Client")
            .field("exec_sql", &self.exec_sql)
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Client {
    /// Build a new Client from the Config.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let api = config.api()?;
        let bearer = api.access_token.as_deref().unwrap_or(&api.public_token);

        let pg_client = postgrest::Postgrest::new(api.endpoint.as_str())
            .insert_header("apikey", &api.public_token)
            .insert_header("Authorization", format!("Bearer {bearer}"));

        tracing::debug!(endpoint = %api.endpoint, exec_sql = ?config.exec_sql, "built endpoint client");

        Ok(Self {
            pg_client,
            http_client: reqwest::Client::new(),
            exec_sql: config.exec_sql.clone(),
            timeout: config.timeout,
            page_size: config.page_size(),
        })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, ErrorDetail>
    where
        F: std::future::Future<Output = Result<T, ErrorDetail>>,
    {
        match self.timeout {
            None => fut.await,
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ErrorDetail::transport(format!(
                    "timed out after {}",
                    humantime::format_duration(timeout)
                ))),
            },
        }
    }

    fn builder(&self, request: &Select) -> postgrest::Builder {
        let mut builder = self
            .pg_client
            .from(&request.collection)
            .select(request.columns.as_deref().unwrap_or("*"));

        for filter in &request.filters {
            builder = match filter {
                Filter::Eq { column, value } => builder.eq(column, value),
                Filter::In { column, values } => builder.in_(column, values),
            };
        }
        if let Some(order) = &request.order {
            builder = builder.order(order);
        }
        if request.exact_count {
            builder = builder.exact_count();
        }
        builder
    }

    async fn select_head(&self, request: &Select) -> Result<Selected, ErrorDetail> {
        // The PostgREST client has no HEAD builder, so finish the request
        // ourselves and swap its method.
        let mut req = self
            .builder(request)
            .build()
            .build()
            .map_err(ErrorDetail::transport)?;
        *req.method_mut() = reqwest::Method::HEAD;
        tracing::debug!(?req, "built request to execute");

        let resp = self
            .http_client
            .execute(req)
            .await
            .map_err(ErrorDetail::transport)?;
        let resp = check_status(resp).await?;

        Ok(Selected {
            rows: Vec::new(),
            count: content_range_total(&resp),
        })
    }

    // Fetch every page of a select. A server may cap the rows of a page
    // below the requested range (its `max-rows`), so a short page doesn't
    // mean the select is exhausted. Only an empty page, an unsatisfiable
    // range, or reaching a reported total ends it.
    async fn select_pages(&self, request: &Select) -> Result<Selected, ErrorDetail> {
        let mut out = Selected::default();

        'pagination: loop {
            let low = out.rows.len();
            let req = self
                .builder(request)
                .range(low, low + self.page_size - 1)
                .build();
            tracing::debug!(?req, "built request to execute");

            let resp = req.send().await.map_err(ErrorDetail::transport)?;
            if low != 0 && resp.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
                break 'pagination;
            }
            let resp = check_status(resp).await?;

            if out.count.is_none() {
                out.count = content_range_total(&resp);
            }
            let page = match resp.json::<Value>().await.map_err(ErrorDetail::transport)? {
                Value::Array(rows) => rows,
                other => {
                    return Err(ErrorDetail::transport(format!(
                        "expected an array of rows, not: {other}"
                    )))
                }
            };
            tracing::trace!(collection = %request.collection, low, rows = page.len(), "fetched page");

            if page.is_empty() {
                break 'pagination;
            }
            out.rows.extend(page);

            if matches!(out.count, Some(total) if out.rows.len() as u64 >= total) {
                break 'pagination;
            }
        }

        Ok(out)
    }
}

#[async_trait::async_trait]
impl Endpoint for Client {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn execute_raw(&self, text: &str) -> Result<Vec<Value>, ErrorDetail> {
        let mut params = serde_json::Map::new();
        params.insert(self.exec_sql.param.clone(), Value::String(text.to_string()));
        let params = Value::Object(params).to_string();

        self.with_timeout(async {
            let req = self.pg_client.rpc(&self.exec_sql.function, params).build();
            tracing::debug!(?req, "built request to execute");

            let resp = req.send().await.map_err(ErrorDetail::transport)?;
            let resp = check_status(resp).await?;
            let body = resp.text().await.map_err(ErrorDetail::transport)?;

            Ok(rows_of_body(&body))
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(collection = %request.collection))]
    async fn select(&self, request: &Select) -> Result<Selected, ErrorDetail> {
        self.with_timeout(async {
            if request.head {
                self.select_head(request).await
            } else {
                self.select_pages(request).await
            }
        })
        .await
    }
}

// check_status turns a non-success response into an ErrorDetail.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ErrorDetail> {
    let status = resp.status();

    if status.is_success() {
        tracing::trace!(%status, "got successful response");
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(ErrorDetail::from_response(status.as_u16(), &body))
    }
}

fn content_range_total(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(endpoint::parse_content_range)
}

// Map the body returned by the SQL-executing function into rows.
// Functions returning void respond with an empty body or `null`,
// set-returning functions with an array, and scalar ones with a single value.
fn rows_of_body(body: &str) -> Vec<Value> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Null) => Vec::new(),
        Ok(Value::Array(rows)) => rows,
        Ok(other) => vec![other],
        Err(_) => vec![Value::String(body.to_string())],
    }
}
