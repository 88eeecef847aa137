use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config is a configuration profile of `storectl`, stored as JSON under the
/// user's configuration directory. Every field is optional, and flags or
/// environment variables given on the command line take precedence.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    // Remote data endpoint, or None if not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<API>,
    // Database function which executes raw SQL on our behalf.
    #[serde(default)]
    pub exec_sql: ExecSql,
    /// Timeout applied to each individual remote call.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Number of rows requested per page of a select.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct API {
    // URL endpoint of the PostgREST API, such as `https://<project>.supabase.co/rest/v1`.
    pub endpoint: url::Url,
    // Public (shared) API key, sent as the `apikey` header.
    pub public_token: String,
    // Secret access token, sent as a bearer token. Defaults to the public token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecSql {
    /// Name of the RPC function.
    pub function: String,
    /// Name of the function's text parameter which receives the statement.
    pub param: String,
}

impl Default for ExecSql {
    fn default() -> Self {
        Self {
            function: "exec_sql".to_string(),
            param: "query".to_string(),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Overrides are configuration values passed as flags or environment variables.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub endpoint: Option<url::Url>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub timeout: Option<Duration>,
}

impl Config {
    /// Load the named configuration profile. A profile which doesn't exist
    /// yet loads as the default configuration.
    pub fn load(profile: &str) -> anyhow::Result<Self> {
        Self::load_from(&Self::file_path(profile)?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config at {}", path.display()))
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    fn file_path(profile: &str) -> anyhow::Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("couldn't determine the user configuration directory")?
            .join("storectl");
        Ok(dir.join(format!("{profile}.json")))
    }

    /// Apply command-line `overrides` on top of this profile.
    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            endpoint,
            api_key,
            access_token,
            timeout,
        } = overrides;

        match (&mut self.api, endpoint) {
            (Some(api), Some(endpoint)) => api.endpoint = endpoint,
            (None, Some(endpoint)) => {
                self.api = Some(API {
                    endpoint,
                    public_token: String::new(),
                    access_token: None,
                })
            }
            (_, None) => {}
        }
        if let Some(api) = self.api.as_mut() {
            if let Some(api_key) = api_key {
                api.public_token = api_key;
            }
            if access_token.is_some() {
                api.access_token = access_token;
            }
        }
        if timeout.is_some() {
            self.timeout = timeout;
        }
    }

    /// Returns the configured API, or an error if it's missing or incomplete.
    pub fn api(&self) -> anyhow::Result<&API> {
        let Some(api) = &self.api else {
            anyhow::bail!(
                "no endpoint is configured: pass --endpoint or set STORECTL_ENDPOINT"
            );
        };
        if api.public_token.is_empty() {
            anyhow::bail!("no API key is configured: pass --api-key or set STORECTL_API_KEY");
        }
        Ok(api)
    }

    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }
}
