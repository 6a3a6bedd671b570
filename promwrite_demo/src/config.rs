use anyhow::{Context, Result};
use heck::SnakeCase;
use std::time::Duration;
use structopt::StructOpt;

use promwrite_core::remote_write::SampleSource;
use promwrite_core::run::{DemoConfig, WriteMode};
use promwrite_core::store::is_label_name;

#[derive(Debug)]
pub struct Config {
    /// Enables verbose logging of errors that occur while writing or querying
    pub debug: bool,

    pub demo: DemoConfig,
}

impl Config {
    /// Loads configuration from arguments, env and dotenv
    pub fn load() -> Result<Config> {
        // Attempts to find a `.env` file to initialize/extend the environment
        dotenv::dotenv().ok();

        // Load the config from arguments, then environment variables
        let env = Environment::from_args();
        Config::from_environment(env)
    }

    fn from_environment(env: Environment) -> Result<Config> {
        Ok(Config {
            debug: env.debug
                || match dotenv::var("DEBUG").ok() {
                    Some(val) if val == "true" || val == "on" || val == "1" => true,
                    Some(val) if val == "false" || val == "off" || val == "0" || val == "" => false,
                    Some(val) => val.parse::<bool>().context("invalid DEBUG")?,
                    None => false,
                },
            demo: DemoConfig {
                prometheus_url: env.prometheus_url,
                write_mode: env.mode,
                sample_source: env.source,
                service: env.service,
                static_labels: parse_labels(&env.static_labels).context("invalid STATIC_LABELS")?,
                write_timeout: Duration::from_secs(env.write_timeout),
                query_timeout: Duration::from_secs(env.query_timeout),
                query_delay: Duration::from_secs(env.query_delay),
                queries: env
                    .queries
                    .split(';')
                    .map(str::trim)
                    .filter(|x| !x.is_empty())
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>(),
            },
        })
    }
}

/// Parses a comma separated list of `name=value` labels, e.g. "environment=production,version=0.5.0"
fn parse_labels(input: &str) -> Result<Vec<(String, String)>> {
    let mut labels: Vec<(String, String)> = Vec::new();
    for name_value in input.split(',').filter(|x| !x.is_empty()) {
        let name_value = name_value.splitn(2, '=').collect::<Vec<_>>();
        match name_value.as_slice() {
            [name, value]
                if !value.is_empty()
                    && is_label_name(name)
                    && *name == name.to_snake_case() =>
            {
                if labels.iter().any(|(existing, _)| existing == name) {
                    return Err(anyhow::format_err!("duplicate label name {:?}", name));
                }
                labels.push((name.to_string(), value.to_string()));
            }
            _ => {
                return Err(anyhow::format_err!(
                    "expected name=value, got {:?}",
                    name_value.join("=")
                ))
            }
        }
    }
    Ok(labels)
}

#[derive(Debug, StructOpt)]
#[structopt(name = "promwrite-demo")]
struct Environment {
    /// Enables verbose logging of errors that occur while writing or querying
    #[structopt(short, long)]
    debug: bool,

    /// The base url of the Prometheus server
    #[structopt(long, env = "PROMETHEUS_URL", default_value = "http://localhost:9090")]
    prometheus_url: String,

    /// Which write paths to use: "full", "simple" or "both"
    #[structopt(long, env = "WRITE_MODE", default_value = "both")]
    mode: WriteMode,

    /// Where the full path reads samples from: "exposition" or "store"
    #[structopt(long, env = "SAMPLE_SOURCE", default_value = "exposition")]
    source: SampleSource,

    /// The `service` label of the demo metrics
    #[structopt(long, env = "DEMO_SERVICE", default_value = "demo-service")]
    service: String,

    /// A comma separated list of static labels to add to written metrics
    #[structopt(long, env = "STATIC_LABELS", default_value = "")]
    static_labels: String,

    /// How long (in seconds) to wait for a write to be accepted
    #[structopt(long, env = "WRITE_TIMEOUT", default_value = "5")]
    write_timeout: u64,

    /// How long (in seconds) to wait for a query or health check
    #[structopt(long, env = "QUERY_TIMEOUT", default_value = "10")]
    query_timeout: u64,

    /// How long (in seconds) to wait between writing and querying
    #[structopt(long, env = "QUERY_DELAY", default_value = "2")]
    query_delay: u64,

    /// A semicolon separated list of PromQL queries to run after writing
    #[structopt(
        long,
        env = "QUERIES",
        default_value = "demo_counter_total;demo_gauge;demo_request_duration_seconds_count;demo_simple_gauge"
    )]
    queries: String,
}
