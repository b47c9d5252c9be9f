//! Station sync CLI - operator tool for pulling collections.
//!
//! Pulls whole collections (or single pages) from the hosted database API
//! and prints them as JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stationsync_cache::{CacheConfig, CacheKey, CacheMode, MemoryStore};
use stationsync_client::{ClientConfig, HttpTransport, PageCursor};
use stationsync_common::{Credential, SystemClock};
use stationsync_sync::{ResourceSpec, SyncOrchestrator, SyncSettings};

#[derive(Parser)]
#[command(name = "stationsync")]
#[command(about = "Station sync - paginated pulls from the station directory")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON settings file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API root; overrides the settings file.
    #[arg(long, env = "STATIONSYNC_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Database token; overrides the settings file.
    #[arg(long, env = "STATIONSYNC_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every row of a resource.
    Fetch {
        /// Resource name from the settings file, or a collection path.
        resource: String,

        /// Extra query parameter, `key=value`. Repeatable.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Rows per page; overrides the settings file.
        #[arg(long)]
        page_size: Option<u32>,

        /// Cache TTL in seconds (default: the resource's TTL).
        #[arg(long)]
        ttl: Option<u64>,

        /// Skip the cache.
        #[arg(long)]
        nocache: bool,
    },

    /// Fetch a single page.
    Page {
        /// Resource name from the settings file, or a collection path.
        resource: String,

        /// Extra query parameter, `key=value`. Repeatable.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Offset token of the page (default: first page).
        #[arg(short, long)]
        offset: Option<String>,

        /// Rows per page; overrides the settings file.
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Print the cache key a pull would use.
    Key {
        /// Resource name.
        resource: String,

        /// Extra query parameter, `key=value`. Repeatable.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

type Orchestrator = SyncOrchestrator<HttpTransport, MemoryStore>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Key { resource, params } => cmd_key(cli.config.as_deref(), &resource, params),

        Commands::Fetch {
            resource,
            params,
            page_size,
            ttl,
            nocache,
        } => {
            let settings = load_settings(cli.config.as_deref(), cli.base_url, cli.token)?;
            cmd_fetch(settings, &resource, params, page_size, ttl, nocache).await
        }

        Commands::Page {
            resource,
            params,
            offset,
            page_size,
        } => {
            let settings = load_settings(cli.config.as_deref(), cli.base_url, cli.token)?;
            cmd_page(settings, &resource, params, offset, page_size).await
        }
    }
}

/// Parse a `key=value` argument.
fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Read settings from `config` (if any) and apply overrides.
fn load_settings(
    config: Option<&Path>,
    base_url: Option<String>,
    token: Option<String>,
) -> Result<SyncSettings> {
    let mut settings = match config {
        Some(path) => read_settings_file(path)?,
        None => {
            let base_url = base_url
                .clone()
                .context("No settings file given; pass --base-url or set STATIONSYNC_BASE_URL")?;
            SyncSettings::new(ClientConfig::new(base_url, Credential::default()))
        }
    };

    if let Some(base_url) = base_url {
        settings.client.base_url = base_url;
    }
    if let Some(token) = token {
        settings.client.credential = Credential::new(token);
    }

    Ok(settings)
}

/// Parse a JSON settings file.
fn read_settings_file(path: &Path) -> Result<SyncSettings> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    SyncSettings::from_json_str(&json)
        .with_context(|| format!("Invalid settings file {}", path.display()))
}

/// Make sure `resource` resolves, registering it as a collection path if it
/// is not a named resource.
fn ensure_resource(settings: &mut SyncSettings, resource: &str) {
    if !settings.resources.contains_key(resource) {
        settings
            .resources
            .insert(resource.to_string(), ResourceSpec::new(resource));
    }
}

fn build(settings: &SyncSettings) -> Result<Orchestrator> {
    let clock = Arc::new(SystemClock);
    let transport =
        HttpTransport::new(settings.client.clone()).context("Failed to create HTTP client")?;
    let store = MemoryStore::with_clock(clock.clone());

    SyncOrchestrator::new(Arc::new(transport), Arc::new(store), clock, settings)
        .context("Invalid settings")
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Pull every row of a resource.
async fn cmd_fetch(
    mut settings: SyncSettings,
    resource: &str,
    params: Vec<(String, String)>,
    page_size: Option<u32>,
    ttl: Option<u64>,
    nocache: bool,
) -> Result<()> {
    ensure_resource(&mut settings, resource);
    if let Some(size) = page_size {
        settings.client.default_page_size = size;
    }

    let orchestrator = build(&settings)?;
    let params: BTreeMap<String, String> = params.into_iter().collect();
    let ttl = match ttl {
        Some(ttl) => ttl,
        None => orchestrator.ttl_for(resource)?,
    };
    let mode = if nocache {
        CacheMode::Bypass
    } else {
        CacheMode::Use
    };

    info!("Fetching {}", resource);
    let result = orchestrator
        .fetch_all(resource, &params, ttl, mode)
        .await
        .with_context(|| format!("Failed to fetch {}", resource))?;

    info!(
        "Fetched {} rows in {} pages",
        result.rows.len(),
        result.page_count
    );
    print_json(&result)
}

/// Fetch one page.
async fn cmd_page(
    mut settings: SyncSettings,
    resource: &str,
    params: Vec<(String, String)>,
    offset: Option<String>,
    page_size: Option<u32>,
) -> Result<()> {
    ensure_resource(&mut settings, resource);
    if let Some(size) = page_size {
        settings.client.default_page_size = size;
    }

    let orchestrator = build(&settings)?;
    let params: BTreeMap<String, String> = params.into_iter().collect();
    let cursor = offset.map(PageCursor::at).unwrap_or_default();

    let page = orchestrator
        .fetch_page(resource, &params, &cursor)
        .await
        .with_context(|| format!("Failed to fetch page of {}", resource))?;

    print_json(&page)
}

/// Print the cache key for a pull.
///
/// Only the cache and resource sections of the settings are needed, so no
/// client is built.
fn cmd_key(config: Option<&Path>, resource: &str, params: Vec<(String, String)>) -> Result<()> {
    let (cache, resources) = match config {
        Some(path) => {
            let settings = read_settings_file(path)?;
            (settings.cache, settings.resources)
        }
        None => (CacheConfig::default(), BTreeMap::new()),
    };
    let params: BTreeMap<String, String> = params.into_iter().collect();

    print_json(&key_report(&cache, &resources, resource, &params))
}

fn key_report(
    cache: &CacheConfig,
    resources: &BTreeMap<String, ResourceSpec>,
    resource: &str,
    params: &BTreeMap<String, String>,
) -> serde_json::Value {
    let key = CacheKey::derive(&cache.key_prefix, resource, params.iter());
    let ttl_seconds = resources
        .get(resource)
        .and_then(|spec| spec.ttl_seconds)
        .unwrap_or(cache.default_ttl_seconds);

    serde_json::json!({
        "resource": resource,
        "key": key.as_str(),
        "ttlSeconds": ttl_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("city=Berlin").unwrap(),
            ("city".to_string(), "Berlin".to_string())
        );
        assert_eq!(
            parse_param("filter=a=b").unwrap(),
            ("filter".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_load_settings_from_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "client": {{"base_url": "https://api.example.com/api", "credential": "from-file"}},
                "cache": {{"key_prefix": "stations", "default_ttl_seconds": 60}}
            }}"#
        )
        .unwrap();

        let settings = load_settings(Some(file.path()), None, Some("from-env".to_string())).unwrap();
        assert_eq!(settings.client.base_url, "https://api.example.com/api");
        assert_eq!(settings.client.credential.expose(), "from-env");
        assert_eq!(settings.cache.key_prefix, "stations");
    }

    #[test]
    fn test_load_settings_requires_base_url() {
        assert!(load_settings(None, None, None).is_err());

        let settings =
            load_settings(None, Some("https://api.example.com/api".to_string()), None).unwrap();
        assert!(settings.client.credential.is_empty());
        settings.validate().unwrap();
    }

    #[test]
    fn test_collection_path_becomes_resource() {
        let mut settings = load_settings(
            None,
            Some("https://api.example.com/api".to_string()),
            Some("tok".to_string()),
        )
        .unwrap();
        ensure_resource(&mut settings, "database/rows/table/5/");

        let orchestrator = build(&settings).unwrap();
        let key = orchestrator.key_for("database/rows/table/5/", &BTreeMap::new());
        assert_eq!(key.as_str(), "api:database/rows/table/5/:");
    }

    #[test]
    fn test_key_report_needs_no_client() {
        let mut resources = BTreeMap::new();
        resources.insert(
            "stations".to_string(),
            ResourceSpec::new("database/rows/table/1/").with_ttl(90),
        );
        let params: BTreeMap<String, String> = [("type", "fast"), ("city", "Köln")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let report = key_report(&CacheConfig::default(), &resources, "stations", &params);
        assert_eq!(report["key"], "api:stations:city=K%C3%B6ln&type=fast");
        assert_eq!(report["ttlSeconds"], 90);

        let report = key_report(&CacheConfig::default(), &resources, "regions", &BTreeMap::new());
        assert_eq!(report["key"], "api:regions:");
        assert_eq!(report["ttlSeconds"], 300);
    }

    #[test]
    fn test_key_command_with_settings_file_ignores_client_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"client": {{"base_url": "not a url", "credential": ""}}, "cache": {{"key_prefix": "v2"}}}}"#
        )
        .unwrap();

        assert!(cmd_key(Some(file.path()), "stations", Vec::new()).is_ok());
    }

    #[test]
    fn test_missing_settings_file() {
        let err = load_settings(Some(Path::new("/nonexistent/stationsync.json")), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }
}
