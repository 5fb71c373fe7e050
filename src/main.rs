use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod github;
mod issue;
mod mapping;
mod rate_limit;
mod repo_name;
mod report;
mod scanner;

use cache::{IssueCache, Store};
use config::Config;
use mapping::IdentifierMapping;
use repo_name::RepoName;
use report::Styles;
use scanner::{CommitScanner, Tracker};

#[derive(Parser)]
#[clap(about, version)]
struct Args {
    /// Path to the CPython repo [default: ~/dev/cpython]
    #[clap(long, env = "CPYTHON_REPO")]
    repo: Option<PathBuf>,
    /// Personal access token from GitHub
    #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// How stale the issue cache can get (0: not at all, 0.1: default, 100: very stale)
    #[clap(long, default_value = "0.1")]
    staleness: f64,
    /// Where fetched issues are kept [default: ~/.cache/cpython_closable_issues]
    #[clap(long, env = "CLOSABLE_ISSUES_CACHE")]
    cache_dir: Option<PathBuf>,
    #[clap(long, env = "GITHUB_API_URL", default_value = github::DEFAULT_API_URL)]
    api_url: String,
    /// The GitHub repository issues live in
    #[clap(long, default_value = "python/cpython")]
    github_repo: RepoName,
    #[clap(long, value_enum, default_value = "auto")]
    color: ColorChoice,
    /// Answer from the cache only, however stale, and never call GitHub
    #[clap(long)]
    offline: bool,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand)]
enum Command {
    /// Open issues that a gh-<n> commit already refers to (the default)
    Gh,
    /// Migrated issues fixed by a single bpo-<n> commit but still open
    Bpo {
        #[clap(long, default_value = "bpo_to_gh.json.gz")]
        mapping: PathBuf,
    },
    /// Rebuild the bpo to GitHub mapping from cached issues
    DeriveMapping {
        #[clap(long, default_value = "bpo_to_gh.json.gz")]
        output: PathBuf,
    },
    /// Open IDLE pull requests still titled with a bpo number
    IdlePrs {
        #[clap(long, default_value = "bpo_to_gh.json.gz")]
        mapping: PathBuf,
    },
}

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Cache(#[from] cache::Error),
    #[error(transparent)]
    Github(#[from] github::Error),
    #[error(transparent)]
    Scanner(#[from] scanner::Error),
    #[error(transparent)]
    Mapping(#[from] mapping::Error),
    #[error(transparent)]
    Report(#[from] report::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();
    if let Err(e) = run(args).await {
        eprintln!("Failed: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<(), Error> {
    let command = args.command.unwrap_or(Command::Gh);
    let config = Config {
        repo: args.repo,
        token: args.token,
        staleness: config::check_staleness(args.staleness)?,
        cache_dir: config::default_cache_dir(args.cache_dir)?,
        api_url: args.api_url,
        github_repo: args.github_repo,
        color: match args.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => console::colors_enabled(),
        },
        offline: args.offline,
    };
    let styles = Styles::new(config.color);
    let stdout = std::io::stdout();

    match command {
        Command::Gh => {
            let repo = config.checked_repo()?;
            let mut cache = open_cache(&config)?;
            let refs = scan(repo, Tracker::Github).await?;
            let open = report::open_referenced(&refs, &mut cache).await?;
            report::render_open_referenced(&mut stdout.lock(), &open, &styles)?;
        }
        Command::Bpo { mapping } => {
            let repo = config.checked_repo()?;
            let mut cache = open_cache(&config)?;
            let mapping = IdentifierMapping::load(&mapping)?;
            let refs = scan(repo, Tracker::Bpo).await?;
            let closable = report::closable_bpo(&refs, &mapping, &mut cache).await?;
            report::render_bpo(&mut stdout.lock(), &closable, &styles)?;
        }
        Command::DeriveMapping { output } => {
            let store = Store::open(&config.cache_dir)?;
            let derived = mapping::derive(store.entry_paths()?).await?;
            derived.save(&output)?;
            info!(entries = derived.len(), output = %output.display(), "wrote mapping");
        }
        Command::IdlePrs { mapping } => {
            let store = Store::open(&config.cache_dir)?;
            let mapping = IdentifierMapping::load(&mapping)?;
            let retitles = report::idle_retitles(&store, &mapping)?;
            report::render_idle(&mut stdout.lock(), &retitles, &styles)?;
        }
    }
    Ok(())
}

fn open_cache(config: &Config) -> Result<IssueCache, Error> {
    let store = Store::open(&config.cache_dir)?;
    if config.offline {
        return Ok(IssueCache::offline(store, config.staleness));
    }
    let token = config.checked_token()?.to_string();
    let client = github::Client::new(&config.api_url, config.github_repo.clone(), token)?;
    Ok(IssueCache::new(store, client, config.staleness))
}

async fn scan(repo: PathBuf, tracker: Tracker) -> Result<scanner::References, Error> {
    let scanner = CommitScanner::new(repo, tracker);
    let refs = tokio::task::spawn_blocking(move || scanner.scan()).await??;
    Ok(refs)
}
