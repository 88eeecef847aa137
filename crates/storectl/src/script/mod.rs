use crate::endpoint::{Endpoint, ErrorDetail};
use crate::output::CliOutput;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

mod split;

pub use split::{split, SplitMode, Statement, StatementKind, QUERY_KEYWORD, TERMINATOR};

#[derive(Debug, clap::Args)]
#[clap(rename_all = "kebab-case")]
pub struct Sql {
    /// Path of the SQL script to execute, or `-` to read it from stdin.
    #[clap(long, short = 'f')]
    file: String,
    /// How the script is split into statements.
    #[clap(long, value_enum, default_value_t = SplitMode::Naive)]
    split: SplitMode,
    /// Print the parsed statements without executing them.
    #[clap(long)]
    dry_run: bool,
}

impl Sql {
    pub async fn run(&self, ctx: &mut crate::CliContext) -> anyhow::Result<()> {
        // The script is read before any client is built, so that an
        // unavailable script fails without touching the endpoint.
        let script = read_script(&self.file).await?;

        if self.dry_run {
            let statements = Statement::parse(&script, self.split);
            eprintln!("Parsed {} statements.", statements.len());
            return ctx.write_all(statements);
        }

        let client = ctx.client()?;
        let results = run(&client, &script, self.split).await;

        ctx.write_all(results.iter().cloned())?;
        eprint!("{}", Summary::of(&results));

        Ok(())
    }
}

/// ExecutionResult is the outcome of submitting a single [`Statement`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub ordinal: usize,
    pub kind: StatementKind,
    pub text: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        /// Returned rows. Present only for queries.
        #[serde(skip_serializing_if = "Option::is_none")]
        rows: Option<Vec<Value>>,
    },
    Failure {
        error: ErrorDetail,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn rows(&self) -> Option<&[Value]> {
        match &self.outcome {
            Outcome::Success { rows } => rows.as_deref(),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error } => Some(error),
        }
    }
}

/// Read the full text of a script from `source`, which is a file path or
/// `-` for stdin. The source is closed as soon as its text has been read.
pub async fn read_script(source: &str) -> Result<String, crate::Error> {
    let read = async {
        if source == "-" {
            let mut script = String::new();
            tokio::io::stdin().read_to_string(&mut script).await?;
            Ok::<_, std::io::Error>(script)
        } else {
            tokio::fs::read_to_string(PathBuf::from(source)).await
        }
    };

    let script = read.await.map_err(|err| crate::Error::ScriptUnavailable {
        source_name: if source == "-" {
            "<stdin>".to_string()
        } else {
            source.to_string()
        },
        source: err,
    })?;

    tracing::debug!(source, len = script.len(), "read script");
    Ok(script)
}

/// Run each statement of `script` against the `endpoint`, in order,
/// returning the result of every statement. Each result is also logged
/// as soon as it's known.
#[tracing::instrument(skip_all, fields(mode = ?mode))]
pub async fn run<E>(endpoint: &E, script: &str, mode: SplitMode) -> Vec<ExecutionResult>
where
    E: Endpoint + ?Sized,
{
    let statements = Statement::parse(script, mode);
    tracing::info!(statements = statements.len(), "executing script");

    let mut results = Vec::with_capacity(statements.len());

    for Statement {
        ordinal,
        kind,
        text,
    } in statements
    {
        let outcome = match endpoint.execute_raw(&text).await {
            Ok(rows) => {
                let rows = match kind {
                    StatementKind::Query => Some(rows),
                    StatementKind::Mutation => None,
                };
                tracing::info!(
                    ordinal,
                    kind = kind.as_str(),
                    rows = rows.as_ref().map(Vec::len),
                    "statement succeeded"
                );
                Outcome::Success { rows }
            }
            Err(error) => {
                tracing::warn!(ordinal, kind = kind.as_str(), %error, "statement failed");
                Outcome::Failure { error }
            }
        };

        results.push(ExecutionResult {
            ordinal,
            kind,
            text,
            outcome,
        });
    }

    results
}

/// Summary is a human-readable account of a completed script.
pub struct Summary<'r> {
    results: &'r [ExecutionResult],
}

impl<'r> Summary<'r> {
    pub fn of(results: &'r [ExecutionResult]) -> Self {
        Self { results }
    }
}

impl std::fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed: Vec<&ExecutionResult> =
            self.results.iter().filter(|r| !r.is_success()).collect();

        writeln!(
            f,
            "Executed {} statements: {} succeeded, {} failed.",
            self.results.len(),
            self.results.len() - failed.len(),
            failed.len(),
        )?;
        for result in failed {
            if let Some(error) = result.error() {
                writeln!(f, "  #{} ({}): {error}", result.ordinal, result.kind.as_str())?;
            }
        }
        Ok(())
    }
}

impl CliOutput for ExecutionResult {
    fn table_headers() -> Vec<&'static str> {
        vec!["Ordinal", "Kind", "Outcome", "Rows", "Error", "Statement"]
    }

    fn into_table_row(self) -> Vec<String> {
        let (outcome, rows, error) = match self.outcome {
            Outcome::Success { rows } => (
                "success",
                rows.map(|rows| rows.len().to_string()).unwrap_or_default(),
                String::new(),
            ),
            Outcome::Failure { error } => ("failure", String::new(), error.to_string()),
        };

        vec![
            self.ordinal.to_string(),
            self.kind.as_str().to_string(),
            outcome.to_string(),
            rows,
            error,
            self.text,
        ]
    }
}

impl CliOutput for Statement {
    fn table_headers() -> Vec<&'static str> {
        vec!["Ordinal", "Kind", "Statement"]
    }

    fn into_table_row(self) -> Vec<String> {
        vec![
            self.ordinal.to_string(),
            self.kind.as_str().to_string(),
            self.text,
        ]
    }
}
