//! pocketllm-chat: interactive terminal client for the chat core.
//!
//! Usage:
//!   pocketllm-chat [--config <file.yaml>]
//!
//! Each input line is sent as one streamed turn of the current session.

use anyhow::Context;
use futures::StreamExt;
use pocketllm_core::{ChatEvent, ChatRequest, Identity, ServiceConfig, ServiceContext};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_usage() {
    println!(
        r#"pocketllm-chat

USAGE:
    pocketllm-chat [--config <file.yaml>]

COMMANDS (inside the prompt):
    /new        Start a new session
    /history    List sessions and message counts
    /stats      Show cache statistics and service metrics
    /flush      Drop every cached response
    /quit       Exit

ENVIRONMENT:
    POCKETLLM_*     Configuration overrides (see ServiceConfig)
    RUST_LOG        Log filter, e.g. pocketllm_core=debug"#
    );
}

fn load_config(args: &[String]) -> anyhow::Result<ServiceConfig> {
    let path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1));
    let config = match path {
        Some(path) => ServiceConfig::from_yaml_file(path)
            .with_context(|| format!("reading config {path}"))?
            .with_env_overrides()?,
        None => ServiceConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("warn".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let ctx = ServiceContext::builder(load_config(&args)?).connect().await;
    let me = Identity::admin("local");
    let mut session_id: Option<String> = None;

    println!("pocketllm-chat {} (type /quit to exit)", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session_id = None;
                println!("(new session)");
            }
            "/history" => {
                for session in ctx.history(&me) {
                    let marker = if session_id.as_deref() == Some(session.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {}  {} messages", session.id, session.len());
                }
            }
            "/stats" => {
                let stats = ctx.cache_stats(&me).await?;
                let metrics = ctx.metrics(&me).await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            }
            "/flush" => {
                let removed = ctx.flush_cache(&me).await?;
                println!("(flushed {removed} entries)");
            }
            cmd if cmd.starts_with('/') => {
                println!("unknown command {cmd}");
            }
            prompt => {
                let mut request = ChatRequest::new(prompt);
                request.session_id = session_id.clone();
                let (mut events, _cancel) = match ctx.chat_stream(&me, request) {
                    Ok(pair) => pair,
                    Err(e) => {
                        eprintln!("error: {e}");
                        continue;
                    }
                };
                while let Some(event) = events.next().await {
                    match event {
                        ChatEvent::Start { session_id: id, .. } => session_id = Some(id),
                        ChatEvent::Token { content } => {
                            print!("{content}");
                            std::io::stdout().flush()?;
                        }
                        ChatEvent::Error { message } => eprintln!("\nerror: {message}"),
                        ChatEvent::Done {
                            tokens_used, cached, ..
                        } => {
                            let source = if cached { ", cached" } else { "" };
                            println!("\n[{tokens_used} tokens{source}]");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
