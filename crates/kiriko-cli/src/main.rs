use std::sync::Arc;

use clap::{Parser, Subcommand};

use kiriko_api::types::{ScanRequest, ScanType, ServerPick, SyncState};
use kiriko_api::{Api, Client};
use kiriko_core::connect::ConnectPhase;
use kiriko_core::jobs::{JobMonitor, ToastPhase};
use kiriko_core::poller::{PollControl, Poller};
use kiriko_core::trim::TrimPhase;
use kiriko_core::{AppConfig, Caches, ConnectionController, CoreError, JobFeedKey, TrimController};

#[derive(Parser)]
#[command(name = "kiriko", about = "Terminal client for a Kiriko media-cleanup server")]
struct Cli {
    /// Backend base URL (overrides the config file).
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show connection state and library statistics.
    Status,
    /// Link a Plex account: PIN, server pick, library selection.
    Connect,
    /// Clear the linked account and server.
    Disconnect,
    /// Start a library sync and watch its progress.
    Sync {
        /// Only watch a sync that is already running.
        #[arg(long)]
        watch_only: bool,
    },
    /// Start a library scan and follow it to completion.
    Scan {
        /// Scan a single media file instead of the whole library.
        #[arg(long)]
        media_id: Option<i64>,
    },
    /// Remove a segment from a media file.
    Trim {
        media_id: i64,
        /// Segment start, seconds.
        #[arg(long)]
        start: f64,
        /// Segment end, seconds.
        #[arg(long)]
        end: f64,
        /// Seed from (and resolve) this detected issue.
        #[arg(long)]
        issue: Option<i64>,
        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("KIRIKO_LOG").unwrap_or_else(|_| "kiriko=info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    let config = AppConfig::load()?;
    let base_url = cli.server.unwrap_or(config.server.base_url.clone());
    tracing::debug!(%base_url, "using backend");
    let service = Arc::new(Client::new(&base_url)?);
    let caches = Arc::new(Caches::new());

    match cli.command {
        Command::Status => status(service, caches).await,
        Command::Connect => connect(service, caches).await,
        Command::Disconnect => disconnect(service, caches).await,
        Command::Sync { watch_only } => sync(service, caches, &config, watch_only).await,
        Command::Scan { media_id } => scan(service, caches, &config, media_id).await,
        Command::Trim {
            media_id,
            start,
            end,
            issue,
            yes,
        } => trim(service, caches, &config, media_id, start, end, issue, yes).await,
    }
}

async fn status(service: Arc<Client>, caches: Arc<Caches>) -> Result<(), CoreError> {
    let status = {
        let service = service.clone();
        caches
            .connection
            .get_or_fetch(|| async move { service.connection_status().await })
            .await?
    };

    if status.connected {
        println!(
            "Connected to {} as {}",
            status.server.name, status.account.username
        );
        println!("  server url: {}", status.server.url);
        println!("  libraries:  {}", status.library_keys.join(", "));
        match status.sync.status {
            SyncState::Running => println!(
                "  sync:       running ({}/{})",
                status.sync.processed, status.sync.total
            ),
            state => println!("  sync:       {state:?}"),
        }
    } else {
        println!("Not connected; run `kiriko connect`");
    }

    let stats = {
        let service = service.clone();
        caches
            .stats
            .get_or_fetch(|| async move { service.media_stats().await })
            .await?
    };
    println!(
        "Library: {} files, {} scanned, {} unresolved issue(s)",
        stats.total_files, stats.scanned_files, stats.unresolved_issues
    );
    Ok(())
}

async fn connect(service: Arc<Client>, caches: Arc<Caches>) -> Result<(), CoreError> {
    {
        let probe = service.clone();
        let status = caches
            .connection
            .get_or_fetch(|| async move { probe.connection_status().await })
            .await?;
        if status.connected {
            println!(
                "Already connected to {} as {}",
                status.server.name, status.account.username
            );
            return Ok(());
        }
    }

    let controller = ConnectionController::new(service, caches);
    let mut rx = controller.subscribe();
    controller.start();

    let mut pin_shown = false;
    loop {
        if rx.changed().await.is_err() {
            break;
        }
        let state = rx.borrow_and_update().clone();
        if let Some(message) = &state.error {
            eprintln!("error: {message}");
        }
        match state.phase {
            ConnectPhase::AwaitingAuth { ref pin, .. } if !pin_shown => {
                pin_shown = true;
                println!("Enter code {} at {}", pin.pin_code, pin.auth_url);
                println!("Waiting for authorization (ctrl-c to abort)...");
            }
            ConnectPhase::PickingServer { ref servers } => {
                if servers.is_empty() {
                    eprintln!("no servers available on this account");
                    controller.cancel();
                    return Ok(());
                }
                for (i, server) in servers.iter().enumerate() {
                    println!("  [{}] {} ({})", i + 1, server.name, server.best_url);
                }
                let line = prompt("Pick a server: ").await?;
                let index: usize = match line.trim().parse::<usize>() {
                    Ok(n) if n >= 1 && n <= servers.len() => n - 1,
                    _ => {
                        eprintln!("invalid choice; aborting");
                        controller.cancel();
                        return Ok(());
                    }
                };
                let server = &servers[index];
                controller.pick_server(ServerPick {
                    name: server.name.clone(),
                    machine_id: server.machine_id.clone(),
                    url: server.best_url.clone(),
                });
            }
            ConnectPhase::PickingLibraries {
                ref sections,
                ref selected,
                saving: false,
            } => {
                println!("Libraries to sync:");
                for section in sections {
                    let mark = if selected.contains(&section.key) { "x" } else { " " };
                    println!("  [{mark}] {}  {}", section.key, section.title);
                }
                let line = prompt("Keys to toggle (space-separated, Enter to keep): ").await?;
                for key in line.split_whitespace() {
                    controller.toggle_section(key.to_string());
                }
                controller.save_selection();
            }
            ConnectPhase::Connected { .. } => {
                println!("Connected.");
                return Ok(());
            }
            ConnectPhase::Idle if pin_shown || state.error.is_some() => {
                // A failure bounced us back out.
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}

async fn disconnect(service: Arc<Client>, caches: Arc<Caches>) -> Result<(), CoreError> {
    service.disconnect().await?;
    caches.connection.invalidate();
    println!("Disconnected.");
    Ok(())
}

async fn sync(
    service: Arc<Client>,
    caches: Arc<Caches>,
    config: &AppConfig,
    watch_only: bool,
) -> Result<(), CoreError> {
    if !watch_only {
        let started = service.start_sync().await?;
        if !started {
            println!("A sync is already running; watching it.");
        }
    }

    // Single shared subscription; stops itself once the sync settles.
    let poller = Poller::new();
    let interval = config.polling.sync_interval();
    let mut handle = poller.subscribe(
        JobFeedKey::Sync,
        {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { service.sync_status().await }
            }
        },
        move |latest: Option<&kiriko_api::types::SyncStatus>| match latest {
            Some(status) if status.status != SyncState::Running => PollControl::Stop,
            _ => PollControl::Repeat(interval),
        },
    );

    while handle.changed().await {
        let Some(status) = handle.latest() else {
            continue;
        };
        match status.status {
            SyncState::Running => {
                println!(
                    "  syncing {}/{} ({} imported, {} updated)",
                    status.processed, status.total, status.imported, status.updated
                );
            }
            SyncState::Completed => {
                println!(
                    "Sync complete: {} imported, {} updated",
                    status.imported, status.updated
                );
                caches.invalidate_listings();
                caches.connection.invalidate();
                return Ok(());
            }
            SyncState::Failed => {
                eprintln!(
                    "Sync failed: {}",
                    status.error.as_deref().unwrap_or("unknown error")
                );
                return Ok(());
            }
            SyncState::Cancelled => {
                println!("Sync cancelled.");
                return Ok(());
            }
            SyncState::Idle => {
                println!("No sync running.");
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn scan(
    service: Arc<Client>,
    caches: Arc<Caches>,
    config: &AppConfig,
    media_id: Option<i64>,
) -> Result<(), CoreError> {
    let request = match media_id {
        Some(id) => ScanRequest {
            scan_type: ScanType::SingleFile,
            target_path: None,
            media_file_id: Some(id),
        },
        None => ScanRequest {
            scan_type: ScanType::FullLibrary,
            target_path: None,
            media_file_id: None,
        },
    };
    let job = service.start_scan(request).await?;
    println!("Scan job {} started", job.id);

    let poller = Poller::new();
    let monitor = JobMonitor::scan(
        service,
        caches,
        &poller,
        config.polling.jobs_interval(),
    );
    let mut rx = monitor.subscribe();

    let mut seen_running = false;
    loop {
        if rx.changed().await.is_err() {
            return Ok(());
        }
        let toast = rx.borrow_and_update().clone();
        match toast.phase {
            ToastPhase::Running => {
                seen_running = true;
                if let Some(job) = &toast.job {
                    println!(
                        "  scanning {}/{} ({} issue(s) found)",
                        job.processed, job.total, job.issues_found
                    );
                }
            }
            ToastPhase::Completed => {
                let issues = toast.job.map(|j| j.issues_found).unwrap_or(0);
                println!("Scan complete: {issues} issue(s) found");
                return Ok(());
            }
            ToastPhase::Failed => {
                let message = toast
                    .job
                    .and_then(|j| j.error)
                    .unwrap_or_else(|| "unknown error".to_string());
                eprintln!("Scan failed: {message}");
                return Ok(());
            }
            ToastPhase::Hidden if seen_running => {
                // Cancelled out from under us.
                println!("Scan is no longer running.");
                return Ok(());
            }
            ToastPhase::Hidden => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn trim(
    service: Arc<Client>,
    caches: Arc<Caches>,
    config: &AppConfig,
    media_id: i64,
    start: f64,
    end: f64,
    issue: Option<i64>,
    yes: bool,
) -> Result<(), CoreError> {
    let controller = TrimController::open(
        service,
        caches,
        media_id,
        issue,
        config.polling.trim_interval(),
    )
    .await?;

    controller.set_start(start);
    controller.set_end(end);
    let session = controller.session();
    println!(
        "Will remove {:.1}s – {:.1}s ({:.1}s) from media {}",
        session.selection.start(),
        session.selection.end(),
        session.selection.remove_duration(),
        media_id
    );
    println!("The file is rewritten in place (a .bak copy is kept).");

    if !yes {
        let line = prompt("Type 'trim' to confirm: ").await?;
        if line.trim() != "trim" {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut rx = controller.subscribe();

    // Arm, then confirm.
    controller.activate();
    controller.activate();
    loop {
        if rx.changed().await.is_err() {
            return Ok(());
        }
        let session = rx.borrow_and_update().clone();
        match &session.phase {
            TrimPhase::Completed { .. } => {
                println!("Trim complete.");
                return Ok(());
            }
            TrimPhase::Failed { message, .. } => {
                eprintln!("Trim failed: {message}");
                return Ok(());
            }
            TrimPhase::Editing if session.error.is_some() => {
                eprintln!(
                    "Submission rejected: {}",
                    session.error.as_deref().unwrap_or_default()
                );
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn prompt(message: &str) -> Result<String, CoreError> {
    use std::io::Write;
    print!("{message}");
    std::io::stdout().flush()?;
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line)
    })
    .await
    .expect("stdin task panicked")
    .map_err(CoreError::Io)
}
