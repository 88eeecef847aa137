use clap::Parser;

pub mod catalog;
pub mod client;
pub mod config;
pub mod endpoint;
mod error;
pub mod output;
pub mod script;

#[cfg(test)]
mod testing;

pub use error::Error;
use output::{Output, OutputType};

/// A command-line tool for running SQL scripts and catalog reports against
/// a PostgREST data endpoint.
#[derive(Debug, Parser)]
#[clap(author, about, version)]
pub struct Cli {
    /// Configuration profile to use.
    ///
    /// Profiles are distinct configurations of the `storectl` tool, and are
    /// completely optional. Use multiple profiles to track multiple projects
    /// or development endpoints.
    #[clap(long, default_value = "default", env = "STORECTL_PROFILE")]
    profile: String,
    /// URL of the PostgREST endpoint, such as `https://<project>.supabase.co/rest/v1`.
    #[clap(long, env = "STORECTL_ENDPOINT")]
    endpoint: Option<url::Url>,
    /// Public API key of the endpoint.
    #[clap(long, env = "STORECTL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Access token to authenticate with. Defaults to the API key.
    #[clap(long, env = "STORECTL_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    /// Timeout of each individual remote call, such as `30s` or `2m`.
    #[clap(long)]
    timeout: Option<humantime::Duration>,

    #[clap(subcommand)]
    cmd: Command,

    #[clap(flatten)]
    output: Output,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Execute a SQL script, one statement at a time.
    ///
    /// The script is split into statements at each `;`, and every statement
    /// is submitted in order. A failing statement doesn't stop the script:
    /// its error is reported alongside its ordinal, and execution continues
    /// with the next statement. Rows returned by `SELECT` statements are
    /// included in the output.
    Sql(script::Sql),
    /// Report product counts of each category, and optionally the products
    /// of one category with their variants.
    Catalog(catalog::Catalog),
}

#[derive(Debug)]
pub struct CliContext {
    config: config::Config,
    output: output::Output,
    client: Option<client::Client>,
}

impl CliContext {
    /// Returns a client of the endpoint, creating a new one if necessary.
    /// This function will return an error if the endpoint or its API key
    /// isn't configured.
    pub fn client(&mut self) -> anyhow::Result<client::Client> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => {
                let client = client::Client::new(&self.config)?;
                self.client = Some(client.clone());
                Ok(client)
            }
        }
    }

    pub fn write_all<I, T>(&self, items: I) -> anyhow::Result<()>
    where
        T: output::CliOutput,
        I: IntoIterator<Item = T>,
    {
        output::print_all(self.output_type(), items)
    }

    pub fn output_type(&self) -> OutputType {
        self.output.resolve()
    }
}

impl Cli {
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut config = config::Config::load(&self.profile)?;
        config.apply(config::Overrides {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            access_token: self.access_token.clone(),
            timeout: self.timeout.as_deref().copied(),
        });

        let mut context = CliContext {
            config,
            output: self.output.clone(),
            client: None,
        };

        match &self.cmd {
            Command::Sql(sql) => sql.run(&mut context).await,
            Command::Catalog(catalog) => catalog.run(&mut context).await,
        }
    }
}
