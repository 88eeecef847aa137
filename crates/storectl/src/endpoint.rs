use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Endpoint is the remote data service through which every read and write
/// of `storectl` flows. It offers exactly two call shapes: execution of raw
/// SQL text, and structured selects against a named collection.
///
/// Implementations report failures as an [`ErrorDetail`] value rather than
/// an error type of their own, so that callers can record a failure against
/// a single item and carry on.
#[async_trait::async_trait]
pub trait Endpoint: Send + Sync {
    /// Execute raw SQL `text`, returning any rows it produced.
    async fn execute_raw(&self, text: &str) -> Result<Vec<Value>, ErrorDetail>;

    /// Select rows (and optionally an exact count) from a collection.
    async fn select(&self, request: &Select) -> Result<Selected, ErrorDetail>;
}

/// A filtered, ordered select against a single collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub collection: String,
    /// Comma-separated columns to return, or None for all columns.
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    /// Comma-separated columns to order by, each ascending.
    pub order: Option<String>,
    /// Request an exact count of matching rows.
    pub exact_count: bool,
    /// Request only the count, without transferring any rows.
    pub head: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: String },
    In { column: String, values: Vec<String> },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } => column,
        }
    }
}

impl Select {
    pub fn from(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn in_<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.filters.push(Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn order(mut self, columns: impl Into<String>) -> Self {
        self.order = Some(columns.into());
        self
    }

    pub fn exact_count(mut self) -> Self {
        self.exact_count = true;
        self
    }

    /// Marks the request as count-only. Implies an exact count.
    pub fn head(mut self) -> Self {
        self.exact_count = true;
        self.head = true;
        self
    }
}

/// Outcome of a successful [`Select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selected {
    /// Selected rows, in endpoint order. Always empty for head requests.
    pub rows: Vec<Value>,
    /// Exact count of matching rows, when one was requested and reported.
    pub count: Option<u64>,
}

impl Selected {
    /// Decode selected rows into typed records.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<Vec<T>, ErrorDetail> {
        self.rows
            .into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|err| ErrorDetail {
                    message: format!("decoding row: {err}"),
                    ..Default::default()
                })
            })
            .collect()
    }

    /// Returns the reported count, or an error if the endpoint didn't report one.
    pub fn require_count(&self) -> Result<u64, ErrorDetail> {
        self.count.ok_or_else(|| ErrorDetail {
            message: "endpoint did not report a row count".to_string(),
            ..Default::default()
        })
    }
}

/// ErrorDetail describes a single failed remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// HTTP status of the failed call. None if no response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorDetail {
    /// Build an ErrorDetail for a call which never received a response.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self {
            message: err.to_string(),
            ..Default::default()
        }
    }

    /// Build an ErrorDetail from a non-success response `status` and `body`.
    /// PostgREST error bodies are decoded, and anything else becomes the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Body {
            message: String,
            code: Option<String>,
            details: Option<String>,
            hint: Option<String>,
        }

        match serde_json::from_str::<Body>(body) {
            Ok(Body {
                message,
                code,
                details,
                hint,
            }) => Self {
                status: Some(status),
                code,
                message,
                details,
                hint,
            },
            Err(_) => Self {
                status: Some(status),
                message: body.trim().to_string(),
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "{status} ({code}): ")?,
            (Some(status), None) => write!(f, "{status}: ")?,
            (None, Some(code)) => write!(f, "({code}): ")?,
            (None, None) => (),
        }
        f.write_str(&self.message)?;

        if let Some(details) = &self.details {
            write!(f, " [{details}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorDetail {}

/// Parse the total from a `Content-Range` header value, such as `0-24/3573`
/// or `*/42`. Returns None if the total is unknown (`*`) or malformed.
pub fn parse_content_range(header: &str) -> Option<u64> {
    let (_range, total) = header.trim().rsplit_once('/')?;
    total.parse().ok()
}
