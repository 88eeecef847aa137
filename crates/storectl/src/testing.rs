use crate::endpoint::{Endpoint, ErrorDetail, Filter, Select, Selected};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// MemoryEndpoint is an in-memory Endpoint over fixture collections.
/// It applies filters and ordering the way PostgREST would, records every
/// request it receives, and can be told to fail or delay specific requests.
#[derive(Default)]
pub struct MemoryEndpoint {
    raw: HashMap<String, Result<Vec<Value>, ErrorDetail>>,
    collections: BTreeMap<String, Vec<Value>>,
    // Failures keyed on (collection, filter value).
    failures: Vec<(String, Option<String>)>,
    // Delays keyed on a filter value.
    delays: HashMap<String, Duration>,
    unreachable: bool,
    submitted: Mutex<Vec<String>>,
    selects: Mutex<Vec<Select>>,
}

impl MemoryEndpoint {
    pub fn with_raw(mut self, text: &str, result: Result<Vec<Value>, ErrorDetail>) -> Self {
        self.raw.insert(text.to_string(), result);
        self
    }

    pub fn with_collection(mut self, name: &str, rows: Value) -> Self {
        let Value::Array(rows) = rows else {
            panic!("collection fixture must be an array");
        };
        self.collections.insert(name.to_string(), rows);
        self
    }

    /// Fail selects of `collection`, or only those filtering on `value`.
    pub fn failing(mut self, collection: &str, value: Option<&str>) -> Self {
        self.failures
            .push((collection.to_string(), value.map(str::to_string)));
        self
    }

    /// Delay selects which filter on `value`.
    pub fn delaying(mut self, value: &str, delay: Duration) -> Self {
        self.delays.insert(value.to_string(), delay);
        self
    }

    /// Fail every call as though no connection could be made.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn selects(&self) -> Vec<Select> {
        self.selects.lock().unwrap().clone()
    }

    fn filter_values(request: &Select) -> Vec<&str> {
        request
            .filters
            .iter()
            .flat_map(|filter| match filter {
                Filter::Eq { value, .. } => vec![value.as_str()],
                Filter::In { values, .. } => values.iter().map(String::as_str).collect(),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Endpoint for MemoryEndpoint {
    async fn execute_raw(&self, text: &str) -> Result<Vec<Value>, ErrorDetail> {
        self.submitted.lock().unwrap().push(text.to_string());

        if self.unreachable {
            return Err(ErrorDetail::transport("connection refused"));
        }
        match self.raw.get(text) {
            Some(result) => result.clone(),
            None => Err(ErrorDetail {
                status: Some(400),
                code: Some("42601".to_string()),
                message: format!(
                    "syntax error at or near {:?}",
                    text.split_whitespace().next().unwrap_or_default()
                ),
                ..Default::default()
            }),
        }
    }

    async fn select(&self, request: &Select) -> Result<Selected, ErrorDetail> {
        self.selects.lock().unwrap().push(request.clone());

        let values = Self::filter_values(request);
        if let Some(delay) = values.iter().find_map(|v| self.delays.get(*v)) {
            tokio::time::sleep(*delay).await;
        }
        if self.unreachable {
            return Err(ErrorDetail::transport("connection refused"));
        }
        for (collection, value) in &self.failures {
            if *collection == request.collection
                && value.as_deref().map_or(true, |v| values.contains(&v))
            {
                return Err(ErrorDetail::from_response(
                    503,
                    r#"{"message":"upstream unavailable"}"#,
                ));
            }
        }

        let Some(rows) = self.collections.get(&request.collection) else {
            return Err(ErrorDetail::from_response(
                404,
                &format!(
                    r#"{{"code":"42P01","message":"relation \"public.{}\" does not exist"}}"#,
                    request.collection
                ),
            ));
        };

        let mut rows: Vec<Value> = rows
            .iter()
            .filter(|row| request.filters.iter().all(|filter| matches(row, filter)))
            .cloned()
            .collect();

        if let Some(order) = &request.order {
            let columns: Vec<&str> = order.split(',').map(str::trim).collect();
            rows.sort_by(|l, r| {
                columns
                    .iter()
                    .map(|c| compare(&l[*c], &r[*c]))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let count = request.exact_count.then(|| rows.len() as u64);
        if request.head {
            rows.clear();
        }
        Ok(Selected { rows, count })
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let actual = text_of(&row[filter.column()]);

    match filter {
        Filter::Eq { value, .. } => actual.as_ref() == Some(value),
        Filter::In { values, .. } => actual.map_or(false, |a| values.contains(&a)),
    }
}

// Numbers order numerically and strings lexicographically. Nulls sort last.
fn compare(l: &Value, r: &Value) -> Ordering {
    match (l, r) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (l, r) => l.to_string().cmp(&r.to_string()),
    }
}

/// Request received by a fake HTTP server started with [`serve`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    // Lower-cased header names, with their values.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }
}

pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// Serve HTTP/1.1 on a local port, answering every request with `handler`.
/// Returns a PostgREST-style base URL of the server, and a log of the
/// requests it has answered.
pub async fn serve<H>(handler: H) -> (url::Url, Arc<Mutex<Vec<Request>>>)
where
    H: Fn(&Request) -> Response + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    let log = Arc::new(Mutex::new(Vec::new()));

    let served = log.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let handler = handler.clone();
            let served = served.clone();

            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let response = handler(&request);
                let head_only = request.method == "HEAD";
                served.lock().unwrap().push(request);
                write_response(&mut stream, response, head_only).await;
            });
        }
    });

    let url = url::Url::parse(&format!("http://{addr}/rest/v1")).unwrap();
    (url, log)
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_len = loop {
        if let Some(at) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break at;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_len]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or_default();

    let mut body = buf[head_len + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(Request {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

async fn write_response(stream: &mut TcpStream, response: Response, head_only: bool) {
    let mut out = format!(
        "HTTP/1.1 {} Fake\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    if !head_only {
        out.push_str(&response.body);
    }

    let _ = stream.write_all(out.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Handler which serves `rows` as a PostgREST table. Like a PostgREST
/// server configured with `max-rows`, it never returns more than
/// `max_rows` rows at once, whatever the requested range.
pub fn table(
    rows: Vec<Value>,
    max_rows: usize,
) -> impl Fn(&Request) -> Response + Send + Sync + 'static {
    move |request| {
        let (low, high) = request
            .header("range")
            .and_then(|range| range.split_once('-'))
            .and_then(|(low, high)| Some((low.parse().ok()?, high.parse().ok()?)))
            .unwrap_or((0, usize::MAX - 1));

        let total = rows.len();
        let low: usize = low.min(total);
        let end = (high + 1).min(total).min(low + max_rows);
        let page = rows[low..end].to_vec();

        let exact = request
            .header("prefer")
            .map_or(false, |prefer| prefer.contains("count=exact"));
        let range = if page.is_empty() {
            "*".to_string()
        } else {
            format!("{low}-{}", end - 1)
        };
        let total = if exact {
            total.to_string()
        } else {
            "*".to_string()
        };

        Response::json(200, Value::Array(page)).header("content-range", format!("{range}/{total}"))
    }
}
