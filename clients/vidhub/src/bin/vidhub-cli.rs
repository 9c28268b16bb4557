use eyre::Context;
use std::io::IsTerminal;
use tokio_stream::StreamExt;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vidhub_client::api::ApiClient;
use vidhub_client::api::users::{Credentials, User};
use vidhub_client::background::{watch_encoding, watch_live_readiness};
use vidhub_client::config::ClientConfig;
use vidhub_client::entitlement::{EntitlementResolver, Viewer};
use vidhub_client::setup_client;

const SESSION_FILE: &str = "session.json";

const USAGE: &str = "\
usage: vidhub-cli <command>

commands:
  videos [page]              list the public catalog
  access <video-id>          show whether you may watch a video
  watch <video-id>           follow a video's encoding until it finishes
  live-ready <playback-url>  wait for a live stream to start serving
  playlists                  list playlists and whether they are unlocked
  wallet                     show wallet balance and recent transactions

environment:
  VIDHUB_EMAIL, VIDHUB_PASSWORD  credentials for a fresh login
  VIDHUB_API_URL                 backend base URL";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = ClientConfig::from_env().context("load configuration")?;

    let mut stored = String::new();
    if tokio::fs::try_exists(SESSION_FILE)
        .await
        .context("check for stored session")?
    {
        stored = tokio::fs::read_to_string(SESSION_FILE)
            .await
            .context("read stored session")?;
    }
    let credentials = match (
        std::env::var("VIDHUB_EMAIL").ok(),
        std::env::var("VIDHUB_PASSWORD").ok(),
    ) {
        (Some(email), Some(password)) => Some(Credentials {
            email,
            name: None,
            password,
        }),
        _ => None,
    };

    // browsing works without an account
    let (client, user) = if stored.trim().is_empty() && credentials.is_none() {
        tracing::info!("no session and no credentials, continuing anonymously");
        (ApiClient::from_config(&config)?, None)
    } else {
        let (client, user) = setup_client(
            &config,
            &stored,
            credentials.as_ref(),
            async |id: &str, message: &str| eprintln!("[{id}] {message}"),
        )
        .await?;
        (client, Some(user))
    };

    let result = run(command, &args[1..], &client, user.as_ref(), &config).await;

    // save the (possibly refreshed) session even if the command failed
    if let Some(session) = client.session().await {
        let json = serde_json::to_string(&session).context("serialize session")?;
        tokio::fs::write(SESSION_FILE, &json)
            .await
            .context("write session file")?;
    }

    result
}

async fn run(
    command: &str,
    args: &[String],
    client: &ApiClient,
    user: Option<&User>,
    config: &ClientConfig,
) -> eyre::Result<()> {
    let viewer = user.map_or_else(Viewer::anonymous, Viewer::from_user);

    match (command, args) {
        ("videos", rest) => {
            let page = match rest.first() {
                Some(page) => page.parse().context("parse page number")?,
                None => 1,
            };
            let videos = client
                .list_videos_page(page, 20, None)
                .await
                .context("list videos")?;
            eprintln!(
                "==> page {} of {} videos",
                videos.meta.page, videos.meta.total
            );
            for video in &videos.data {
                let tier = video.access.tier().context("read video pricing")?;
                println!(
                    "{}  {:<40}  {:?}",
                    video.id,
                    video.title.as_deref().unwrap_or("(untitled)"),
                    tier
                );
            }
        }
        ("access", [video_id, ..]) => {
            let video = client.get_video(video_id).await.context("fetch video")?;
            let item = video.content_item().context("read video pricing")?;
            let resolution = EntitlementResolver::new(client)
                .resolve(&item, &viewer)
                .await
                .context("resolve access")?;
            println!("{}", resolution.decision.reason());
            if let Some(offer) = resolution.decision.unlock() {
                println!("unlock with {} for {}", offer.purchase, offer.price);
            }
            if let Some(playback) = resolution.playback {
                println!("{}", playback.url);
            }
        }
        ("watch", [video_id, ..]) => {
            let video = client.get_video(video_id).await.context("fetch video")?;
            eprintln!("==> {} is {}", video.id(), video.status);
            let mut poller = watch_encoding(client, &video, config.poll_interval);
            let mut updates = poller.subscribe();
            let printer = tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    eprintln!("    now {}", *updates.borrow_and_update());
                }
            });
            let status = tokio::select! {
                status = poller.wait_terminal() => status,
                _ = tokio::signal::ctrl_c() => None,
            };
            // stops the poller if it is still running, which lets the printer finish
            drop(poller);
            let _ = printer.await;
            match status {
                Some(status) => println!("{status}"),
                None => eprintln!("stopped watching"),
            }
        }
        ("live-ready", [playback_url, ..]) => {
            let mut poller = watch_live_readiness(client, playback_url, config.poll_interval);
            eprintln!("==> waiting for {playback_url} to start serving");
            tokio::select! {
                ready = poller.wait_terminal() => {
                    if ready.is_some() {
                        println!("live");
                    }
                }
                _ = tokio::signal::ctrl_c() => eprintln!("stopped waiting"),
            }
        }
        ("playlists", _) => {
            let playlists = client.list_playlists().await.context("list playlists")?;
            let resolver = EntitlementResolver::new(client);
            for playlist in &playlists {
                let item = playlist.content_item().context("read playlist pricing")?;
                let resolution = resolver
                    .resolve(&item, &viewer)
                    .await
                    .context("resolve playlist access")?;
                println!(
                    "{}  {:<40}  {} videos  {}",
                    playlist.id,
                    playlist.title,
                    playlist.videos.len(),
                    resolution.decision.reason()
                );
            }
        }
        ("wallet", _) => {
            let wallet = client.get_wallet().await.context("fetch wallet")?;
            println!(
                "balance {:.2} (available {:.2}, withdrawn {:.2})",
                wallet.balance,
                wallet.available(),
                wallet.total_withdrawn
            );
            let transactions = client.list_wallet_transactions(10).take(10);
            let mut transactions = std::pin::pin!(transactions);
            while let Some(transaction) = transactions.next().await {
                let transaction = transaction.context("fetch wallet transaction")?;
                println!(
                    "{}  {:?} {:?}  {:.2}  {:?}",
                    transaction.created_at,
                    transaction.direction,
                    transaction.reason,
                    transaction.amount,
                    transaction.status
                );
            }
        }
        _ => {
            eprintln!("{USAGE}");
            eyre::bail!("unknown command or missing argument: {command}");
        }
    }
    Ok(())
}
