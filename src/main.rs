use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsis_health::{analyze, Analysis, ConnectionHealth, Snapshot, Thresholds};
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const POLL_MIN: u64 = 60;
const POLL_MAX: u64 = 14400;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify DOCSIS channel health from cable modem snapshots", long_about = None)]
struct Args {
    /// Threshold JSON file (bundled reference values when omitted)
    #[arg(short, long, env = "DOCSIS_THRESHOLDS", global = true)]
    thresholds: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one snapshot and print the result as JSON
    Analyze {
        /// Snapshot file, http(s) URL, or "-" for stdin
        #[arg(short, long, env = "DOCSIS_SOURCE", default_value = "-")]
        source: String,
    },

    /// Re-analyze a snapshot source on an interval, one JSON line per poll
    Watch {
        /// Snapshot file or http(s) URL
        #[arg(short, long, env = "DOCSIS_SOURCE")]
        source: String,

        /// Poll interval in seconds (60 to 14400)
        #[arg(short, long, env = "POLL_INTERVAL", default_value = "900")]
        interval: u64,

        /// Path to state file for tracking the last reported health (optional)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },

    /// Print the effective thresholds as JSON
    Thresholds,
}

/// Where snapshot documents come from.
#[derive(Debug, Clone)]
enum Source {
    Stdin,
    File(PathBuf),
    Url(String),
}

impl Source {
    fn parse(raw: &str) -> Self {
        if raw == "-" {
            Source::Stdin
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            Source::Url(raw.to_string())
        } else {
            Source::File(PathBuf::from(raw))
        }
    }
}

/// Create a reqwest client that accepts self-signed certificates
fn create_client() -> Result<Client> {
    let client = Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(5))
        .build()?;
    Ok(client)
}

struct Fetcher {
    source: Source,
    client: Option<Client>,
}

impl Fetcher {
    fn new(source: Source) -> Result<Self> {
        let client = match source {
            Source::Url(_) => Some(create_client()?),
            _ => None,
        };
        Ok(Self { source, client })
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let text = match (&self.source, &self.client) {
            (Source::Stdin, _) => {
                let mut text = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut text)
                    .await
                    .context("Failed to read snapshot from stdin")?;
                text
            }
            (Source::File(path), _) => fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?,
            (Source::Url(url), Some(client)) => {
                debug!("Fetching snapshot from: {}", url);
                let response = client.get(url).send().await?.error_for_status()?;
                let bytes = response.bytes().await?;
                debug!("Received {} bytes", bytes.len());
                String::from_utf8_lossy(&bytes).into_owned()
            }
            (Source::Url(url), None) => anyhow::bail!("No HTTP client for {}", url),
        };

        Snapshot::from_json(&text).context("Failed to parse snapshot")
    }
}

/// Load thresholds once at startup. A broken file never stops analysis;
/// it degrades to the hardcoded limits.
async fn load_thresholds(path: &Option<PathBuf>) -> Thresholds {
    let Some(path) = path else {
        info!("Using bundled thresholds");
        return Thresholds::default();
    };

    match fs::read_to_string(path).await {
        Ok(contents) => match Thresholds::parse(&contents) {
            Ok(thresholds) => {
                match thresholds.source() {
                    Some(source) => info!("Loaded thresholds from {} ({})", path.display(), source),
                    None => info!("Loaded thresholds from {}", path.display()),
                }
                thresholds
            }
            Err(e) => {
                warn!("Could not parse {} ({}), using defaults", path.display(), e);
                Thresholds::empty()
            }
        },
        Err(e) => {
            warn!("Could not read {} ({}), using defaults", path.display(), e);
            Thresholds::empty()
        }
    }
}

/// Load the last reported health from the state file
async fn load_last_health(state_file: &Option<PathBuf>) -> Option<ConnectionHealth> {
    let path = state_file.as_ref()?;

    match fs::read_to_string(path).await {
        Ok(contents) => match contents.parse::<ConnectionHealth>() {
            Ok(health) => {
                debug!("Loaded last health: {}", health);
                Some(health)
            }
            Err(e) => {
                error!("Failed to parse state file: {}", e);
                None
            }
        },
        Err(e) => {
            debug!("Could not read state file ({}), starting fresh", e);
            None
        }
    }
}

/// Save the last reported health to the state file
async fn save_last_health(state_file: &Option<PathBuf>, health: ConnectionHealth) -> Result<()> {
    if let Some(path) = state_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(path, health.as_str()).await?;
        debug!("Saved last health: {}", health);
    }
    Ok(())
}

/// How the connection health moved between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Started,
    Degraded(ConnectionHealth),
    Recovered(ConnectionHealth),
    Unchanged,
}

fn transition(previous: Option<ConnectionHealth>, current: ConnectionHealth) -> Transition {
    match previous {
        None => Transition::Started,
        Some(previous) if current > previous => Transition::Degraded(previous),
        Some(previous) if current < previous => Transition::Recovered(previous),
        Some(_) => Transition::Unchanged,
    }
}

fn report_transition(previous: Option<ConnectionHealth>, analysis: &Analysis) {
    let current = analysis.summary.health;
    let issues = serde_json::to_string(&analysis.summary.health_issues).unwrap_or_default();

    match transition(previous, current) {
        Transition::Started => info!("Monitoring started (Health: {}, issues: {})", current, issues),
        Transition::Degraded(previous) => {
            warn!("Connection health degraded: {} -> {} (issues: {})", previous, current, issues)
        }
        Transition::Recovered(previous) => {
            info!("Connection health recovered: {} -> {}", previous, current)
        }
        Transition::Unchanged => debug!("Connection health unchanged: {}", current),
    }
}

#[derive(Serialize)]
struct PollRecord<'a> {
    timestamp: String,
    analysis: &'a Analysis,
}

async fn watch(
    fetcher: Fetcher,
    thresholds: &Thresholds,
    interval: u64,
    state_file: Option<PathBuf>,
) -> Result<()> {
    let interval = interval.clamp(POLL_MIN, POLL_MAX);
    info!("Polling interval: {} seconds", interval);
    if state_file.is_some() {
        info!("State persistence enabled");
    }

    let mut last_health = load_last_health(&state_file).await;
    let mut interval_timer = time::interval(Duration::from_secs(interval));

    loop {
        interval_timer.tick().await;

        let snapshot = match fetcher.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to fetch snapshot: {:#}", e);
                continue;
            }
        };

        let analysis = analyze(&snapshot, thresholds);
        report_transition(last_health, &analysis);

        let record = PollRecord {
            timestamp: chrono::Local::now().to_rfc3339(),
            analysis: &analysis,
        };
        println!("{}", serde_json::to_string(&record)?);

        let health = analysis.summary.health;
        if last_health != Some(health) {
            last_health = Some(health);
            if let Err(e) = save_last_health(&state_file, health).await {
                error!("Failed to save state: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let thresholds = load_thresholds(&args.thresholds).await;

    match args.command {
        Command::Analyze { source } => {
            let fetcher = Fetcher::new(Source::parse(&source))?;
            let snapshot = fetcher.fetch().await?;
            let analysis = analyze(&snapshot, &thresholds);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Watch {
            source,
            interval,
            state_file,
        } => {
            let source = Source::parse(&source);
            if matches!(source, Source::Stdin) {
                anyhow::bail!("watch needs a file or URL source, not stdin");
            }
            watch(Fetcher::new(source)?, &thresholds, interval, state_file).await?;
        }
        Command::Thresholds => {
            println!("{}", serde_json::to_string_pretty(&thresholds.effective())?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_source_parse() {
        assert!(matches!(Source::parse("-"), Source::Stdin));
        assert!(matches!(
            Source::parse("http://192.168.178.1/data.json"),
            Source::Url(url) if url == "http://192.168.178.1/data.json"
        ));
        assert!(matches!(Source::parse("https://modem/data"), Source::Url(_)));
        assert!(matches!(
            Source::parse("snapshots/latest.json"),
            Source::File(path) if path == PathBuf::from("snapshots/latest.json")
        ));
        // Only a lone dash means stdin
        assert!(matches!(Source::parse("-snap.json"), Source::File(_)));
        assert!(matches!(Source::parse("ftp://modem/data"), Source::File(_)));
    }

    #[test]
    fn test_transition_follows_health_order() {
        use ConnectionHealth::*;

        assert_eq!(transition(None, Poor), Transition::Started);
        assert_eq!(transition(Some(Good), Marginal), Transition::Degraded(Good));
        assert_eq!(transition(Some(Marginal), Poor), Transition::Degraded(Marginal));
        assert_eq!(transition(Some(Good), Poor), Transition::Degraded(Good));
        assert_eq!(transition(Some(Poor), Marginal), Transition::Recovered(Poor));
        assert_eq!(transition(Some(Marginal), Good), Transition::Recovered(Marginal));
        assert_eq!(transition(Some(Marginal), Marginal), Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let state_file = Some(dir.path().join("state").join("last_health"));

        assert_eq!(load_last_health(&state_file).await, None);

        save_last_health(&state_file, ConnectionHealth::Marginal)
            .await
            .unwrap();
        assert_eq!(
            load_last_health(&state_file).await,
            Some(ConnectionHealth::Marginal)
        );

        save_last_health(&state_file, ConnectionHealth::Good)
            .await
            .unwrap();
        assert_eq!(load_last_health(&state_file).await, Some(ConnectionHealth::Good));
    }

    #[tokio::test]
    async fn test_state_file_garbage_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_health");
        std::fs::write(&path, "excellent").unwrap();

        assert_eq!(load_last_health(&Some(path)).await, None);
        assert_eq!(load_last_health(&None).await, None);
        save_last_health(&None, ConnectionHealth::Poor).await.unwrap();
    }
}
