use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod ai;
mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod gate;
mod router;
mod sources;
mod storage;
mod ui;

use crate::ai::ChatClient;
use crate::audio::{transport::SongbirdTransport, MusicSessionManager};
use crate::bot::{
    context::CommandContext, directory::CacheDirectory, handlers, ChannelNotifier, NovaBot,
};
use crate::cache::MusicCache;
use crate::config::Config;
use crate::gate::CommandGate;
use crate::router::Dispatcher;
use crate::sources::{DirectUrlResolver, SourceRouter, SpotifyResolver, YtDlpResolver};
use crate::storage::{DocumentStore, JsonStorage};

const LATENCY_POLL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nova=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🌸 Starting Nova v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    config.validate()?;
    info!("⚙️ {}", config.summary());

    let storage: Arc<dyn DocumentStore> = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);
    let cache = Arc::new(MusicCache::new(config.cache_size));
    let http = reqwest::Client::new();

    // Sources
    let youtube = Arc::new(YtDlpResolver::new());
    let spotify = match config.spotify_credentials() {
        Some((client_id, client_secret)) => Some(Arc::new(SpotifyResolver::new(
            http.clone(),
            client_id,
            client_secret,
            youtube.clone(),
        )?)),
        None => {
            info!("🎧 Spotify credentials not set, Spotify links are disabled");
            None
        }
    };
    let resolver = Arc::new(SourceRouter::new(
        youtube,
        Arc::new(DirectUrlResolver::new(http.clone())),
        spotify,
        cache.clone(),
    ));

    // Voice
    let songbird = Songbird::serenity();
    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), http.clone(), lost_tx));

    // The notifier needs the client's HTTP handle, which only exists once the
    // client is built; it gets its own with the same token.
    let notifier = Arc::new(ChannelNotifier::new(Arc::new(serenity::all::Http::new(
        &config.discord_token,
    ))));
    let music = Arc::new(MusicSessionManager::new(
        config.session_settings(),
        transport,
        resolver,
        notifier,
    ));

    {
        let music = music.clone();
        tokio::spawn(async move {
            while let Some(guild_id) = lost_rx.recv().await {
                if let Err(e) = music.leave(guild_id).await {
                    warn!("Cleanup after lost connection in guild {}: {}", guild_id, e);
                }
            }
        });
    }

    let ai = Arc::new(ChatClient::new(
        http.clone(),
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    ));
    if !ai.is_available() {
        info!("🤖 OPENAI_API_KEY not set, AI features are disabled");
    }

    let gate = Arc::new(CommandGate::new(config.owner_ids.iter().copied()));
    let dispatcher = Arc::new(Dispatcher::new(
        gate.clone(),
        handlers::build_router(config.default_cooldown),
    ));
    info!("📝 {} commands ready", dispatcher.router().len());

    let config = Arc::new(config);
    let directory = Arc::new(CacheDirectory::new());
    let context = Arc::new(CommandContext::new(
        config.clone(),
        music.clone(),
        storage,
        ai,
        directory.clone(),
    ));
    let handler = NovaBot::new(context.clone(), dispatcher, gate, cache);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;
    directory.attach(client.cache.clone(), client.http.clone());

    {
        let shards = client.shard_manager.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LATENCY_POLL);
            loop {
                interval.tick().await;
                let latency = shards
                    .runners
                    .lock()
                    .await
                    .values()
                    .find_map(|runner| runner.latency);
                context.status.set_latency(latency);
            }
        });
    }

    {
        let shards = client.shard_manager.clone();
        let music = music.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl+C: {:?}", e);
                return;
            }
            info!("⚠️ Shutdown requested, closing sessions...");
            music.shutdown();
            shards.shutdown_all().await;
        });
    }

    info!("🚀 Connecting to Discord");
    if let Err(why) = client.start().await {
        error!("❌ Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    let version = YtDlpResolver::version().await?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}
