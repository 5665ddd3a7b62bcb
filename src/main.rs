// src/main.rs
// Interactive driver: stdin lines act as the recognition stream.
//
// Plain lines are final fragments, lines starting with "~" are interim
// previews, and "/" commands drive the session lifecycle.

use anyhow::Context as _;
use lingobridge::config;
use lingobridge::reorganize::GeminiRegrouper;
use lingobridge::session::{SessionController, SessionSettings};
use lingobridge::storage::{MemoryStore, RestStore, SessionStore};
use lingobridge::translate::{GoogleTranslateAdapter, TranslationDispatcher};
use lingobridge::PersistenceOutbox;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const DRAIN_INTERVAL: Duration = Duration::from_secs(30);

fn config_path() -> PathBuf {
    std::env::var("LINGOBRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("lingobridge.json"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = config_path();
    let cfg = config::load_or_create(&path)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to load configuration")?;
    info!(
        "Configured {} → {} (speaker {})",
        cfg.source_language,
        cfg.target_language,
        cfg.speaker_id
    );

    let backend_url = std::env::var("LINGOBRIDGE_BACKEND_URL")
        .ok()
        .or_else(|| cfg.backend_url.clone());
    let backend_key = std::env::var("LINGOBRIDGE_BACKEND_KEY")
        .ok()
        .or_else(|| config::decode_backend_api_key(&cfg));

    let store: Arc<dyn SessionStore> = match (&backend_url, &backend_key) {
        (Some(url), Some(key)) => Arc::new(RestStore::new(url.clone(), key.clone())),
        _ => {
            warn!("No storage backend configured; records stay in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let translate_key = std::env::var("GOOGLE_TRANSLATE_API_KEY")
        .ok()
        .or_else(|| config::decode_translate_api_key(&cfg))
        .unwrap_or_default();
    if translate_key.is_empty() {
        warn!("No translation API key; translations will be recorded empty");
    }
    let dispatcher = Arc::new(TranslationDispatcher::new(Arc::new(
        GoogleTranslateAdapter::new(translate_key),
    )));

    let outbox = Arc::new(PersistenceOutbox::open(
        Arc::clone(&store),
        config::outbox_dir(&cfg),
        &cfg.speaker_id,
        dispatcher.provider_name(),
    ));

    let settings = SessionSettings {
        speaker_id: cfg.speaker_id.clone(),
        source_language: cfg.source_language.clone(),
        target_language: cfg.target_language.clone(),
        title: None,
        persist: cfg.persist_remote,
        auto_pipeline: cfg.auto_finalize_pipeline,
    };

    let mut controller = SessionController::new(
        settings,
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        Arc::clone(&outbox),
    );

    let gemini_key = std::env::var("GEMINI_API_KEY")
        .ok()
        .or_else(|| config::decode_gemini_api_key(&cfg));
    if let Some(key) = gemini_key {
        controller = controller.with_regrouper(Arc::new(GeminiRegrouper::new(key)));
    } else {
        info!("No Gemini API key; AI reorganize is unavailable");
    }
    let controller = Arc::new(controller);

    let drain_task = tokio::spawn(Arc::clone(&outbox).run_drain_loop(DRAIN_INTERVAL));

    println!("lingobridge — type text as final fragments, '~ text' for interim.");
    println!("Commands: /start /stop /finalize /reorg /merge <n> <n>.. /offline /online /drain /list /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("stdin closed")? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('~') {
            controller.on_fragment(rest.trim(), false).await;
            println!("… {}", controller.live_preview());
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !run_command(&controller, &outbox, command).await? {
                break;
            }
            continue;
        }

        controller.on_fragment(&line, true).await;
    }

    drain_task.abort();
    Ok(())
}

async fn run_command(
    controller: &Arc<SessionController>,
    outbox: &Arc<PersistenceOutbox>,
    command: &str,
) -> anyhow::Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "start" => match controller.start().await {
            Ok(session) => println!("listening — session {}", session.id),
            Err(e) => println!("start failed: {}", e),
        },
        "stop" => {
            controller.stop().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("paused");
            print_transcript(controller).await;
        }
        "finalize" => match controller.finalize().await {
            Ok(session) => println!(
                "completed {} — {} utterances in {}s",
                session.id, session.utterance_count, session.duration_seconds
            ),
            Err(e) => println!("finalize failed: {}", e),
        },
        "reorg" => match controller.reorganize().await {
            Ok(()) => print_transcript(controller).await,
            Err(e) => println!("reorganize failed: {}", e),
        },
        "merge" => {
            let indices: Vec<usize> = parts.filter_map(|p| p.parse().ok()).collect();
            let transcripts = controller.transcripts().await;
            let ids: Vec<String> = indices
                .iter()
                .filter_map(|&i| transcripts.get(i).map(|e| e.local_id.clone()))
                .collect();
            match controller.merge(&ids).await {
                Ok(entry) => {
                    println!("merged into: {}", entry.original);
                    print_transcript(controller).await;
                }
                Err(e) => println!("merge failed: {}", e),
            }
        }
        "offline" => {
            outbox.set_online(false);
            println!("offline — writes will queue");
        }
        "online" => {
            outbox.set_online(true);
            let outcome = controller.sync_outbox().await;
            println!("online — drain: {:?}", outcome);
        }
        "drain" => {
            let outcome = controller.sync_outbox().await;
            println!("drain: {:?}", outcome);
        }
        "list" => print_transcript(controller).await,
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command: /{}", other),
    }

    if let Some(notice) = controller.take_notice().await {
        println!("notice: {}", notice);
    }
    Ok(true)
}

async fn print_transcript(controller: &Arc<SessionController>) {
    let entries = controller.transcripts().await;
    if entries.is_empty() {
        println!("(transcript empty)");
        return;
    }
    for (i, entry) in entries.iter().enumerate() {
        let pending = if entry.utterance_id.is_none() {
            " [pending]"
        } else {
            ""
        };
        let translated = if entry.translated.is_empty() {
            String::new()
        } else {
            format!(" → {}", entry.translated)
        };
        println!(
            "{:>3}. {} {}{}{}",
            i,
            entry.timestamp.format("%H:%M:%S"),
            entry.original,
            translated,
            pending
        );
    }
}
