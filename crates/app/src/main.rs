//! `easel` — track image-generation tasks, stream chat, run the gateway.

use anyhow::{anyhow, bail, Result};
use base64::Engine as _;
use providers::chat::{ChatApi, ChatChunk, ChatMessage};
use providers::ernie::ErnieClient;
use providers::qwen::QwenClient;
use providers::{BlendDimensions, MidjourneyClient, StabilityClient};
use services::{ActionDispatcher, PollingEngine, SubmissionService, TaskStore};
use shared::TaskRecord;
use std::io::Write;
use std::sync::Arc;

mod args;
mod config;

const USAGE: &str = "\
easel — image generation task tracker

USAGE:
  easel imagine <prompt> [--aspect R] [--version V] [--quality Q] [--style S]
                [--no TEXT] [--chaos N] [--stylize N] [--stop N] [--seed N] [--weird N]
                [--cref URL]... [--cw N] [--tile] [--custom] [--niji]
  easel blend <square|portrait|landscape> <image>...
  easel sd <prompt> [--aspect-ratio R] [--negative TEXT] [--format F] [--seed N]
  easel list
  easel show <id>
  easel watch
  easel retry <id>
  easel action <id> <custom-id>
  easel delete <id>
  easel chat [--provider qwen|ernie] <message>
  easel proxy [addr]

Settings are read from the platform config dir (settings.json).";

fn status_line(rec: &TaskRecord) -> String {
    let mut line = format!(
        "#{:<4} {:<13} {:<5} {}",
        rec.id,
        rec.status.as_str(),
        rec.progress,
        rec.prompt
    );
    if !rec.error.is_empty() {
        line.push_str(&format!("  ({})", rec.error));
    }
    line
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = argv.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &argv[1..];

    let settings = config::load()?;
    let store = Arc::new(TaskStore::open(&config::data_dir()?)?);
    let mj = MidjourneyClient::new(&settings.midjourney);

    match command.as_str() {
        "imagine" => {
            let params = args::parse_imagine(rest)?;
            let service = SubmissionService::new(store.clone(), mj);
            let rec = service.submit_imagine(params).await?;
            println!("{}", status_line(&rec));
        }
        "blend" => {
            let Some(dims) = rest.first() else {
                bail!("blend needs a dimension and at least one image");
            };
            let dims = BlendDimensions::parse(dims)
                .ok_or_else(|| anyhow!("unknown dimensions: {}", dims))?;
            let mut images = Vec::new();
            for path in &rest[1..] {
                let bytes = std::fs::read(path)?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                images.push(format!("data:image/png;base64,{}", encoded));
            }
            let service = SubmissionService::new(store.clone(), mj);
            let rec = service.submit_blend(dims, images).await?;
            println!("{}", status_line(&rec));
        }
        "sd" => {
            let (prompt, extras) = args::parse_one_shot(rest)?;
            let client = StabilityClient::new(&settings.stability);
            let rec = services::submit::submit_one_shot(&store, &client, &prompt, &extras).await?;
            println!("{}", status_line(&rec));
        }
        "list" => {
            let all = store.get_all()?;
            if all.is_empty() {
                println!("no tasks yet");
            }
            for rec in all {
                println!("{}", status_line(&rec));
            }
        }
        "show" => {
            let id = parse_id(rest)?;
            let rec = store.get(id)?.ok_or_else(|| anyhow!("task {} not found", id))?;
            println!("{}", status_line(&rec));
            println!("  bot:      {}", rec.bot_type);
            println!("  vendor:   {}", rec.vendor_task_id);
            println!("  created:  {}", rec.created_at.to_rfc3339());
            if !rec.result_url.is_empty() {
                println!("  result:   {}", rec.result_url);
            }
            for button in &rec.buttons {
                println!("  action:   {:<6} {}", button.label, button.custom_id);
            }
            println!("  params:   {}", serde_json::to_string(&rec.params)?);
        }
        "watch" => {
            let engine = PollingEngine::new(store.clone(), mj, &settings.poll);

            // Re-print in-flight tasks whenever the store changes.
            let mut rx = store.subscribe();
            let watched = store.clone();
            let printer = tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    if let Ok(all) = watched.get_all() {
                        for rec in all.iter().filter(|r| !r.status.is_terminal()) {
                            println!("{}", status_line(rec));
                        }
                    }
                }
            });

            engine.run_until_idle().await?;
            printer.abort();

            println!("all tasks settled:");
            for rec in store.get_all()? {
                println!("{}", status_line(&rec));
            }
        }
        "retry" => {
            let id = parse_id(rest)?;
            let engine = PollingEngine::new(store.clone(), mj, &settings.poll);
            let rec = engine.poll_once(id).await?;
            println!("{}", status_line(&rec));
        }
        "action" => {
            let id = parse_id(rest)?;
            let custom_id = rest
                .get(1)
                .ok_or_else(|| anyhow!("action needs a custom id (see `easel show`)"))?;
            let dispatcher = ActionDispatcher::new(store.clone(), mj);
            let rec = dispatcher.dispatch(id, custom_id).await?;
            println!("{}", status_line(&rec));
        }
        "delete" => {
            let id = parse_id(rest)?;
            store.delete(id)?;
            println!("deleted #{}", id);
        }
        "chat" => {
            run_chat(&settings, rest).await?;
        }
        "proxy" => {
            let addr = rest
                .first()
                .cloned()
                .unwrap_or_else(|| "127.0.0.1:8190".to_string());
            let routes = proxy::routes_from(&settings);
            let gateway = proxy::Gateway::new(routes);
            tokio::task::spawn_blocking(move || gateway.serve(&addr)).await??;
        }
        _ => {
            eprintln!("{}", USAGE);
            bail!("unknown command: {}", command);
        }
    }

    Ok(())
}

fn parse_id(rest: &[String]) -> Result<i64> {
    rest.first()
        .ok_or_else(|| anyhow!("missing task id"))?
        .parse()
        .map_err(|_| anyhow!("task id must be a number"))
}

async fn run_chat(settings: &shared::settings::AppSettings, rest: &[String]) -> Result<()> {
    let mut provider = "qwen".to_string();
    let mut message = String::new();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--provider" => {
                provider = iter
                    .next()
                    .cloned()
                    .ok_or_else(|| anyhow!("--provider needs a value"))?;
            }
            other if !other.starts_with("--") && message.is_empty() => message = other.to_string(),
            other => bail!("unknown chat flag: {}", other),
        }
    }
    if message.is_empty() {
        bail!("chat needs a message");
    }

    let messages = vec![ChatMessage::user(message)];
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let qwen = settings.qwen.clone();
    let ernie = settings.ernie.clone();
    let streamer = tokio::spawn(async move {
        let result = match provider.as_str() {
            "ernie" => ErnieClient::new(&ernie).chat_stream(messages, tx).await,
            "qwen" => QwenClient::new(&qwen).chat_stream(messages, tx).await,
            other => Err(anyhow!("unknown chat provider: {}", other)),
        };
        if let Err(e) = result {
            eprintln!("chat request failed: {}", e);
        }
    });

    while let Some(chunk) = rx.recv().await {
        match chunk {
            ChatChunk::Text(text) => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            ChatChunk::Done => break,
            ChatChunk::Error(e) => {
                eprintln!("\nstream error: {}", e);
                break;
            }
        }
    }
    println!();
    streamer.await?;
    Ok(())
}
