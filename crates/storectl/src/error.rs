use crate::endpoint::ErrorDetail;

/// Error is a failure which stops a `storectl` command entirely.
/// Failures of individual statements or per-item fetches are not errors:
/// they're recorded within results and reports instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("script {source_name} is unavailable")]
    ScriptUnavailable {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch {what}")]
    Fetch {
        what: &'static str,
        #[source]
        detail: ErrorDetail,
    },
    #[error("no category has the id or name {selector:?}")]
    UnknownCategory { selector: String },
}
