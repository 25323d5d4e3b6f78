use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use engage_live::api::models::{ChatLog, Contact, LeadCounts};
use engage_live::utils::normalize_url;
use engage_live::{
    ApiClient, ChatLogFeed, ContactList, Error, LiveRouter, Result, Settings, SnapshotCache,
};

#[derive(Parser)]
#[command(
    name = "engage-live",
    version,
    about = "Follow contacts and chat logs of the engagement dashboard"
)]
struct Cli {
    /// Path to TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Server base URL, overrides the config file
    #[arg(long)]
    base_url: Option<String>,
    /// API token, overrides the config file
    #[arg(long)]
    token: Option<String>,
    /// Do not read or write the local snapshot cache
    #[arg(long)]
    no_cache: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the server answers
    Ping,
    /// List contacts with lead counts
    Contacts {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        per_page: Option<u32>,
        /// Keep running and print live updates
        #[arg(long)]
        follow: bool,
    },
    /// Show the chat log of one contact
    Chat {
        contact_id: String,
        /// Keep running and print live updates
        #[arg(long)]
        follow: bool,
    },
    /// Write the effective settings to the config file
    SaveConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.base_url {
        settings.base_url = normalize_url(&url);
    }
    if let Some(token) = cli.token {
        settings.token = Some(token);
    }

    if let Command::SaveConfig = cli.command {
        settings.save(cli.config.as_deref())?;
        println!("settings saved");
        return Ok(());
    }
    if settings.base_url.is_empty() {
        return Err(Error::Config(
            "base_url is not set; pass --base-url or add it to the config file".into(),
        ));
    }

    let api = Arc::new(ApiClient::new(&settings.base_url, settings.token.clone())?);
    let cache = if cli.no_cache { None } else { open_cache(&settings) };

    match cli.command {
        Command::Ping => {
            let status = api.ping().await?;
            println!("{} answered HTTP {status}", settings.base_url);
            Ok(())
        }
        Command::Contacts { page, per_page, follow } => {
            let per_page = per_page.unwrap_or(settings.per_page);
            contacts(&settings, api, cache.as_ref(), page, per_page, follow).await
        }
        Command::Chat { contact_id, follow } => {
            chat(&settings, api, cache.as_ref(), &contact_id, follow).await
        }
        Command::SaveConfig => Ok(()),
    }
}

fn open_cache(settings: &Settings) -> Option<SnapshotCache> {
    let path = settings.cache_path.clone().or_else(SnapshotCache::default_path)?;
    match SnapshotCache::open(&path) {
        Ok(cache) => Some(cache),
        Err(e) => {
            log::warn!("snapshot cache unavailable at {}: {e}", path.display());
            None
        }
    }
}

fn router_for(settings: &Settings) -> Result<LiveRouter> {
    let url = settings.websocket_url()?;
    Ok(LiveRouter::new(url.to_string(), settings.reconnect_policy()))
}

async fn contacts(
    settings: &Settings,
    api: Arc<ApiClient>,
    cache: Option<&SnapshotCache>,
    page: u32,
    per_page: u32,
    follow: bool,
) -> Result<()> {
    if let Some(cache) = cache {
        match cache.load_contacts(Some(per_page as usize)) {
            Ok(cached) if !cached.is_empty() => {
                println!("-- cached --");
                print_contacts(&cached, LeadCounts::tally(&cached));
            }
            Ok(_) => {}
            Err(e) => log::warn!("could not read cached contacts: {e}"),
        }
    }

    let router = router_for(settings)?;
    let list = ContactList::new(api, router.clone(), page, per_page);
    let mut connections = router.connections();
    if follow {
        router.connect();
    }
    list.refresh().await?;
    connections.borrow_and_update();

    let snapshot = list.snapshot();
    if let Some(cache) = cache {
        if let Err(e) = cache.store_contacts(&snapshot.items) {
            log::warn!("could not cache contacts: {e}");
        }
    }
    print_contacts(&snapshot.items, snapshot.counts());
    println!("page {} of {} contacts", snapshot.page, snapshot.total_count);

    if !follow {
        return Ok(());
    }

    let mut changes = list.changes();
    loop {
        tokio::select! {
            // pushes sent while the socket was down are not replayed
            connected = connections.changed() => {
                if connected.is_err() {
                    break;
                }
                log::debug!("push socket (re)connected, refetching contacts");
                if let Err(e) = list.refresh().await {
                    log::warn!("contact refetch after reconnect failed: {e}");
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = list.snapshot();
                if snapshot.loading {
                    continue;
                }
                if let Some(err) = &snapshot.error {
                    eprintln!("refresh failed: {err}");
                    continue;
                }
                println!("-- updated --");
                print_contacts(&snapshot.items, snapshot.counts());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    router.shutdown().await;
    Ok(())
}

async fn chat(
    settings: &Settings,
    api: Arc<ApiClient>,
    cache: Option<&SnapshotCache>,
    contact_id: &str,
    follow: bool,
) -> Result<()> {
    if let Some(cache) = cache {
        match cache.load_chat_logs(contact_id) {
            Ok(cached) if !cached.is_empty() => {
                println!("-- cached --");
                cached.iter().for_each(print_log);
            }
            Ok(_) => {}
            Err(e) => log::warn!("could not read cached chat logs: {e}"),
        }
    }

    let router = router_for(settings)?;
    let feed = ChatLogFeed::new(api, router.clone());
    let mut connections = router.connections();
    if follow {
        // subscription is issued on connect if the snapshot lands first
        router.connect();
    }
    feed.watch(contact_id).await?;
    connections.borrow_and_update();

    let snapshot = feed.snapshot();
    if let Some(cache) = cache {
        if let Err(e) = cache.store_chat_logs(contact_id, &snapshot.logs) {
            log::warn!("could not cache chat logs: {e}");
        }
    }
    snapshot.logs.iter().for_each(print_log);

    if !follow {
        return Ok(());
    }

    let mut seen: HashMap<String, ChatLog> =
        snapshot.logs.into_iter().map(|l| (l.id.clone(), l)).collect();
    let mut changes = feed.changes();
    loop {
        tokio::select! {
            connected = connections.changed() => {
                if connected.is_err() {
                    break;
                }
                log::debug!("push socket (re)connected, reloading chat log of {contact_id}");
                if let Err(e) = feed.reload().await {
                    log::warn!("chat log reload after reconnect failed: {e}");
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                for log in feed.snapshot().logs {
                    if seen.get(&log.id) != Some(&log) {
                        print_log(&log);
                        seen.insert(log.id.clone(), log);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    drop(feed);
    router.shutdown().await;
    Ok(())
}

fn print_contacts(contacts: &[Contact], counts: LeadCounts) {
    for c in contacts {
        println!(
            "{:>8}  {:<10}  {:>3}  {}  {}",
            c.id,
            c.lead_status,
            c.unread_messages,
            c.label(),
            c.last_message.as_deref().unwrap_or("")
        );
    }
    println!(
        "assigned {}  unassigned {}  resolved {}",
        counts.assigned, counts.unassigned, counts.resolved
    );
}

fn print_log(log: &ChatLog) {
    let who = if log.from_me { "me" } else { "them" };
    let media = log.media.as_deref().map(|m| format!(" [{m}]")).unwrap_or_default();
    println!(
        "{}  {:<4}  {}{}",
        log.sent_at.format("%Y-%m-%d %H:%M"),
        who,
        log.message,
        media
    );
}
