#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;

use modconf::config::{ConfigRegistry, ReloadWatcher, SetOutcome};
use modconf::constants::paths::{APP_DIR, DEFINITIONS_DIR, SETTINGS_DIR};
use modconf::constants::reload::POLL_INTERVAL_MS;
use modconf::host::{DirAssetStore, DirFileStore, SessionRole};
use modconf::patch::ApplyReport;

/// Mod settings: definitions, settings files, asset patching and session sync
#[derive(Parser, Debug)]
#[command(name = "modconf")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory of `<domain>.json` definitions
    #[arg(long, global = true, value_name = "DIR")]
    definitions: Option<PathBuf>,

    /// Directory holding the generated settings files
    #[arg(long, global = true, value_name = "DIR")]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides LOG_LEVEL
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the settings file of one domain, or of all of them
    Show { domain: Option<String> },

    /// Change one setting and save the domain's settings file
    Set {
        domain: String,
        /// Setting code or the name used in the settings file
        code: String,
        /// JSON value; anything that is not valid JSON is taken as a string
        value: String,
    },

    /// Restore a domain to its defaults and save
    Reset { domain: String },

    /// Patch the asset directory once with the current settings
    Apply {
        #[arg(long, value_name = "DIR")]
        assets: PathBuf,

        /// Asset paths that only the server may patch
        #[arg(long = "server-only", value_name = "PATH")]
        server_only: Vec<String>,
    },

    /// Re-apply patches whenever a settings file changes
    Watch {
        #[arg(long, value_name = "DIR")]
        assets: PathBuf,

        #[arg(long, default_value_t = POLL_INTERVAL_MS)]
        interval_ms: u64,
    },

    /// Host the authoritative settings for a session
    #[cfg(unix)]
    Serve {
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Follow a session server and keep the asset directory patched
    #[cfg(unix)]
    Join {
        #[arg(long, value_name = "DIR")]
        assets: PathBuf,

        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Open the settings editor
    #[cfg(feature = "gui")]
    Gui {
        #[arg(long, value_name = "DIR")]
        assets: Option<PathBuf>,
    },
}

fn default_dir(name: &str) -> Result<PathBuf> {
    let base = dirs::config_dir().context("Failed to determine config directory")?;
    Ok(base.join(APP_DIR).join(name))
}

impl Cli {
    fn definitions_dir(&self) -> Result<PathBuf> {
        match &self.definitions {
            Some(dir) => Ok(dir.clone()),
            None => default_dir(DEFINITIONS_DIR),
        }
    }

    fn settings_dir(&self) -> Result<PathBuf> {
        match &self.settings {
            Some(dir) => Ok(dir.clone()),
            None => default_dir(SETTINGS_DIR),
        }
    }
}

fn init_logging(flag: Option<&str>) -> Result<()> {
    let level = match flag.map(str::to_string).or_else(|| std::env::var("LOG_LEVEL").ok()) {
        Some(level) => level.to_lowercase(),
        None => "info".to_string(),
    };
    let log_level = match level.as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

/// Load every definition and read its settings file
fn load_registry(cli: &Cli, role: SessionRole) -> Result<(ConfigRegistry, DirFileStore)> {
    let definitions = cli.definitions_dir()?;
    let files = DirFileStore::new(cli.settings_dir()?);

    let mut registry = ConfigRegistry::new();
    registry.load_dir(&definitions)?;
    registry.set_role(role);
    registry.read_all(&files);
    Ok((registry, files))
}

/// JSON if it parses, otherwise the raw text as a string
fn parse_cli_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_report(report: &ApplyReport) {
    println!(
        "patched {} asset(s), skipped {}, {} patch(es) applied, {} failed",
        report.assets_patched, report.assets_skipped, report.succeeded, report.failed
    );
}

fn show(cli: &Cli, domain: Option<&str>) -> Result<()> {
    let (registry, _) = load_registry(cli, SessionRole::Standalone)?;
    let domains: Vec<&str> = match domain {
        Some(domain) if registry.get(domain).is_none() => bail!("Unknown domain '{domain}'"),
        Some(domain) => vec![domain],
        None => registry.domains().collect(),
    };

    for domain in domains {
        let Some(config) = registry.get(domain) else {
            continue;
        };
        let text = config.render().context(format!("Failed to render settings for '{domain}'"))?;
        println!("### {domain} ({})", config.file_name());
        println!("{text}");
    }
    Ok(())
}

fn set(cli: &Cli, domain: &str, code: &str, raw: &str) -> Result<()> {
    let (mut registry, files) = load_registry(cli, SessionRole::Standalone)?;
    let config = registry.get_mut(domain).context(format!("Unknown domain '{domain}'"))?;

    let code = match config.get(code) {
        Some(setting) => setting.code().to_string(),
        None => match config.find_by_display_code(code) {
            Some(setting) => setting.code().to_string(),
            None => bail!("Unknown setting '{code}' in '{domain}'"),
        },
    };

    match config.set_value(&code, parse_cli_value(raw)) {
        SetOutcome::Changed => {
            if !config.write_to_file(&files) {
                bail!("Failed to save settings for '{domain}'");
            }
            let value = config.get(&code).map(|s| s.value().to_string()).unwrap_or_default();
            println!("{domain}.{code} = {value}");
        }
        SetOutcome::Unchanged => println!("{domain}.{code} unchanged"),
        SetOutcome::UnknownSetting => bail!("Unknown setting '{code}' in '{domain}'"),
        SetOutcome::ServerAuthoritative => bail!("Setting '{code}' is controlled by the server"),
    }
    Ok(())
}

fn reset(cli: &Cli, domain: &str) -> Result<()> {
    let (mut registry, files) = load_registry(cli, SessionRole::Standalone)?;
    let config = registry.get_mut(domain).context(format!("Unknown domain '{domain}'"))?;
    config.restore_to_defaults();
    if !config.write_to_file(&files) {
        bail!("Failed to save settings for '{domain}'");
    }
    println!("{domain} restored to defaults");
    Ok(())
}

fn apply(cli: &Cli, assets: &Path, server_only: &[String]) -> Result<()> {
    let (registry, _) = load_registry(cli, SessionRole::Standalone)?;
    let mut store = DirAssetStore::new(assets).with_server_only(server_only.iter().cloned());
    let report = registry.apply_all(&mut store);
    print_report(&report);
    Ok(())
}

/// Flag raised by SIGINT / SIGTERM
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        signal_hook::flag::register(SIGINT, Arc::clone(&term)).context("Failed to register SIGINT handler")?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&term)).context("Failed to register SIGTERM handler")?;
    }
    Ok(term)
}

fn watch(cli: &Cli, assets: &Path, interval_ms: u64) -> Result<()> {
    let (mut registry, files) = load_registry(cli, SessionRole::Standalone)?;
    let mut store = DirAssetStore::new(assets);
    print_report(&registry.apply_all(&mut store));

    std::fs::create_dir_all(files.root())
        .context(format!("Failed to create settings directory: {}", files.root().display()))?;
    let mut watcher = ReloadWatcher::new(Duration::from_millis(interval_ms));
    watcher.watch(files.root())?;
    info!(dir = %files.root().display(), interval_ms, "Watching settings files");

    let term = shutdown_flag()?;
    let tick = Duration::from_millis(interval_ms.clamp(10, 100));
    while !term.load(Ordering::Relaxed) {
        if watcher.poll(Instant::now()) {
            info!("Settings changed, reloading");
            registry.read_all(&files);
            print_report(&registry.apply_all(&mut store));
        }
        std::thread::sleep(tick);
    }

    info!("Watch stopped");
    Ok(())
}

#[cfg(unix)]
mod session {
    use std::sync::{Arc, Mutex};

    use modconf::sync::{Peer, Reply, SyncRequest, SyncResponse, SyncServer, handle_request};
    use tracing::{debug, error, info, warn};

    use super::*;

    type Peers = Arc<Mutex<Vec<Peer>>>;

    pub fn serve(cli: &Cli, socket: Option<PathBuf>) -> Result<()> {
        let (registry, files) = load_registry(cli, SessionRole::Server)?;
        let registry = Arc::new(Mutex::new(registry));
        let files = Arc::new(files);
        let peers: Peers = Arc::new(Mutex::new(Vec::new()));

        let server = SyncServer::bind(socket)?;
        info!(socket = %server.path().display(), "Serving settings");

        let stop = shutdown_flag()?;
        while !stop.load(Ordering::Relaxed) {
            let Some(peer) = server.poll_peer()? else {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            };

            let writer = match peer.duplicate() {
                Ok(writer) => writer,
                Err(e) => {
                    warn!(error = ?e, "Dropping peer");
                    continue;
                }
            };
            peers.lock().unwrap_or_else(|e| e.into_inner()).push(writer);
            info!("Peer joined");

            let registry = Arc::clone(&registry);
            let files = Arc::clone(&files);
            let peers = Arc::clone(&peers);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || serve_peer(peer, registry, files, peers, stop));
        }

        info!("Server stopped");
        Ok(())
    }

    fn serve_peer(
        mut peer: Peer,
        registry: Arc<Mutex<ConfigRegistry>>,
        files: Arc<DirFileStore>,
        peers: Peers,
        stop: Arc<AtomicBool>,
    ) {
        loop {
            let request: SyncRequest = match peer.recv() {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = ?e, "Peer disconnected");
                    return;
                }
            };

            let reply = {
                let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
                handle_request(&mut registry, files.as_ref(), request)
            };

            // Every write to a peer happens under the peers lock so frames never interleave
            let mut peers = peers.lock().unwrap_or_else(|e| e.into_inner());
            match reply {
                Reply::Respond(response) => {
                    if let Err(e) = peer.send(&response) {
                        warn!(error = ?e, "Failed to answer peer");
                        return;
                    }
                }
                Reply::Broadcast(response) => {
                    peers.retain_mut(|p| match p.send(&response) {
                        Ok(()) => true,
                        Err(e) => {
                            debug!(error = ?e, "Removing unreachable peer");
                            false
                        }
                    });
                }
                Reply::Shutdown => {
                    info!("Shutdown requested by peer");
                    if let Err(e) = peer.send(&SyncResponse::Ready) {
                        error!(error = ?e, "Failed to acknowledge shutdown");
                    }
                    stop.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    pub fn join(cli: &Cli, assets: &Path, socket: Option<PathBuf>) -> Result<()> {
        let mut client = Peer::join(socket)?;
        let mut store = DirAssetStore::new(assets);
        let mut registry = ConfigRegistry::new();

        let snapshots = client.request(SyncRequest::Hello)?;
        if !modconf::sync::apply_response(&mut registry, snapshots) {
            warn!("Server sent no configs");
        }
        info!(domains = registry.len(), "Joined session");

        // Client-side values stay local; the file only ever holds those
        let files = DirFileStore::new(cli.settings_dir()?);
        registry.read_all(&files);
        print_report(&registry.apply_all(&mut store));

        loop {
            let message: SyncResponse = match client.recv() {
                Ok(message) => message,
                Err(e) => {
                    info!(error = ?e, "Server connection closed");
                    return Ok(());
                }
            };
            if modconf::sync::apply_response(&mut registry, message) {
                print_report(&registry.apply_all(&mut store));
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match &cli.command {
        Command::Show { domain } => show(&cli, domain.as_deref()),
        Command::Set { domain, code, value } => set(&cli, domain, code, value),
        Command::Reset { domain } => reset(&cli, domain),
        Command::Apply { assets, server_only } => apply(&cli, assets, server_only),
        Command::Watch { assets, interval_ms } => watch(&cli, assets, *interval_ms),
        #[cfg(unix)]
        Command::Serve { socket } => session::serve(&cli, socket.clone()),
        #[cfg(unix)]
        Command::Join { assets, socket } => session::join(&cli, assets, socket.clone()),
        #[cfg(feature = "gui")]
        Command::Gui { assets } => {
            let (registry, files) = load_registry(&cli, SessionRole::Standalone)?;
            modconf::gui::run_gui(registry, files, assets.clone())
        }
    }
}
