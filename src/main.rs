#[macro_use]
extern crate log;

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use rollup::emit::write_results;
use rollup::report::RunSummary;
use rollup::time::parse_bound;
use rollup::{
    AggregateRequest, Dimensions, Engine, EngineConfig, Granularity, SplitStrategy, TimeWindow,
};

/// Aggregate the per-day activity logs in a time window.
#[derive(Debug, Parser)]
#[clap(name = "rollup", version)]
struct Options {
    /// Start of the window, included (YYYY-MM-DD HH:MM:SS).
    #[clap(long = "from", alias = "from-datetime")]
    from: String,
    /// End of the window, excluded (YYYY-MM-DD HH:MM:SS).
    #[clap(long = "to", alias = "to-datetime")]
    to: String,
    /// Width of the time buckets: 30m or 1day.
    #[clap(long)]
    granularity: Granularity,
    /// Columns used to group the records: user, app or user,app.
    #[clap(long)]
    dimensions: Dimensions,
    /// Keep only these users (comma separated).
    #[clap(long, value_delimiter = ',')]
    user: Option<Vec<String>>,
    /// Keep only these apps (comma separated).
    #[clap(long, value_delimiter = ',')]
    app: Option<Vec<String>>,
    /// Name of the results file, a numeric suffix is added if it already exists.
    #[clap(long, default_value = "result.csv")]
    output: String,
    /// Number of worker threads.
    #[clap(long)]
    threads: Option<usize>,
    /// Directory with the day files.
    #[clap(long)]
    logs_dir: Option<PathBuf>,
    /// Directory where the results are written.
    #[clap(long)]
    results_dir: Option<PathBuf>,
    /// How large files are split among the workers: lines or bytes.
    #[clap(long)]
    split: Option<SplitStrategy>,
    /// TOML configuration file, the command line options take precedence.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Print the summary of the run as JSON.
    #[clap(long)]
    json: bool,
}

impl Options {
    fn engine_config(&self) -> rollup::Result<EngineConfig> {
        let mut config = EngineConfig::load(self.config.as_deref())?;
        if let Some(threads) = self.threads {
            config.workers = threads;
        }
        if let Some(logs_dir) = &self.logs_dir {
            config.logs_dir = logs_dir.clone();
        }
        if let Some(results_dir) = &self.results_dir {
            config.results_dir = results_dir.clone();
        }
        if let Some(split) = self.split {
            config.split = split;
        }
        Ok(config)
    }

    fn request(&self) -> rollup::Result<AggregateRequest> {
        let window = TimeWindow::new(parse_bound(&self.from)?, parse_bound(&self.to)?);
        let mut request = AggregateRequest::new(window, self.granularity, self.dimensions);
        request.users = self.user.as_deref().and_then(to_set);
        request.apps = self.app.as_deref().and_then(to_set);
        Ok(request)
    }
}

/// The filter set of a comma separated option, `None` when no value is left (`--user ""`).
fn to_set(values: &[String]) -> Option<HashSet<String>> {
    let set: HashSet<String> = values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!set.is_empty()).then_some(set)
}

fn run(options: &Options) -> rollup::Result<RunSummary> {
    let config = options.engine_config()?;
    let request = options.request()?;
    let engine = Engine::new(config)?;
    let outcome = engine.aggregate(&request)?;
    let mut summary = RunSummary::new(&outcome, engine.config().workers);

    let start = Instant::now();
    let written = write_results(
        &engine.config().results_dir,
        &options.output,
        request.dimensions,
        outcome.table,
    )?;
    summary = summary.with_output(written.map(|(path, _)| path), start.elapsed());
    Ok(summary)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse();
    match run(&options) {
        Ok(summary) => {
            if options.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        error!("cannot serialize the summary: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("{summary}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
