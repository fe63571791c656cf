//! turnwise - interactive turn orchestration from the terminal
//!
//! Reads one message per line from stdin and runs it as a turn. Pass
//! `--offline` to use the built-in echo model instead of a live one.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnwise::capability::catalog::standard_registry;
use turnwise::llm::{AnthropicClient, LoggingModelClient, ScriptedModel};
use turnwise::system_prompt::build_system_prompt;
use turnwise::{
    CapabilityRegistry, EngineConfig, HistoryStore, ModelClient, Renderable, TurnError,
    TurnOrchestrator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnwise=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let offline = std::env::args().skip(1).any(|arg| arg == "--offline");
    let config = EngineConfig::from_env()?;

    let client = reqwest::Client::new();
    let registry = Arc::new(standard_registry(&config, &client));

    let model: Arc<dyn ModelClient> = if offline {
        tracing::info!("Running offline with the echo model");
        Arc::new(ScriptedModel::echo())
    } else {
        let anthropic = AnthropicClient::new(&config.model, client)?.with_tools(registry.definitions());
        Arc::new(LoggingModelClient::new(Arc::new(anthropic)))
    };

    tracing::info!(
        model = %model.model_id(),
        tools = ?registry.names(),
        "Engine initialized"
    );

    let mut orchestrator = TurnOrchestrator::new(HistoryStore::new(), model, Arc::clone(&registry));
    if let Some(base) = &config.system_prompt {
        orchestrator = orchestrator.with_system_prompt(prompt_for(base, &registry));
    }

    let conversation_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conv_id = %conversation_id, "Conversation started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let handle = match orchestrator.submit(&conversation_id, text) {
            Ok(handle) => handle,
            Err(TurnError::History(e)) => {
                println!("! {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut frames = handle.frames();
        while let Some(frame) = frames.changed().await {
            if frame.is_final() {
                println!("\r{}", render(&frame.payload));
                break;
            }
            print!("\r{}", status_line(&frame.payload));
            std::io::stdout().flush()?;
        }

        if let Err(e) = handle.join().await {
            tracing::error!(error = %e, "Turn failed");
        }
    }

    Ok(())
}

fn prompt_for(base: &str, registry: &CapabilityRegistry) -> String {
    build_system_prompt(base, registry, chrono::Local::now().date_naive())
}

fn status_line(payload: &Renderable) -> String {
    match payload {
        Renderable::Working { status, .. } => format!("... {status}"),
        Renderable::Text { text } => text.lines().last().unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

fn render(payload: &Renderable) -> String {
    match payload {
        Renderable::Blank => String::new(),
        Renderable::Text { text } => text.clone(),
        Renderable::Working { status, .. } => status.clone(),
        Renderable::ToolView { tool, data, .. } => {
            let body = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
            format!("[{tool}]\n{body}")
        }
        Renderable::Apology { message } => message.clone(),
    }
}
