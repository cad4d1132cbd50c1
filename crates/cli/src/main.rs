use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use concourse_core::{Classification, ConversationState, IntentScore, Message, Slot};
use concourse_engine::route_after_classification;
use concourse_handlers::{build_runtime, Runtime, RuntimeConfig};
use concourse_observability::{init_tracing, AppMetrics};
use concourse_storage::Conversation;

#[derive(Debug, Parser)]
#[command(name = "concourse")]
#[command(about = "Concourse airport assistant CLI")]
struct Cli {
    #[arg(long, env = "CONCOURSE_KB_ROOT")]
    kb_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session; history is kept for the lifetime of the process.
    Chat,
    /// Answer a single question and print the turn as JSON.
    Ask { text: String },
    /// Show where a turn would go right after classification.
    Route {
        /// `token=TAG`, e.g. `장기주차장=B-parking_lot`
        #[arg(long = "slot", value_parser = parse_slot)]
        slots: Vec<Slot>,
        /// `intent=confidence`, highest first
        #[arg(long = "intent", value_parser = parse_score)]
        ranking: Vec<IntentScore>,
        /// Number of prior history messages.
        #[arg(long, default_value_t = 0)]
        history: usize,
    },
    /// Print the turn graph edges.
    Graph,
    /// List the intents with a registered handler.
    Handlers,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("concourse_cli");
    let cli = Cli::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(kb_root) = cli.kb_root {
        config.kb_root = kb_root;
    }
    let runtime = build_runtime(config, AppMetrics::shared())
        .context("failed to build the turn runtime")?;

    match cli.command {
        Command::Chat => run_chat(&runtime).await?,
        Command::Ask { text } => {
            let outcome = runtime.graph.run_turn(text, Vec::new()).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "intent": outcome.state.intent(),
                    "rephrased_query": outcome.state.rephrased_query(),
                    "top_intents": outcome.state.top_k_intents_and_probs(),
                    "slots": outcome.state.slots(),
                    "response": outcome.response(),
                    "path": outcome.path,
                }))?
            );
        }
        Command::Route {
            slots,
            ranking,
            history,
        } => {
            let messages = (0..history)
                .map(|idx| {
                    if idx % 2 == 0 {
                        Message::user("…")
                    } else {
                        Message::assistant("…")
                    }
                })
                .collect::<Vec<_>>();
            let state = ConversationState::new("", messages)
                .with_classification(Classification::ranked(ranking, slots));
            let registry = runtime.graph.registry();
            let next = route_after_classification(&state, registry);

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "next": next,
                    "top_intent": state.top_intent(),
                    "slot_domains": registry.slot_groups().specific_domains(state.slots()),
                }))?
            );
        }
        Command::Graph => {
            println!("{}", serde_json::to_string_pretty(&runtime.graph.edges())?);
        }
        Command::Handlers => {
            for intent in runtime.graph.registry().supported_intents() {
                println!("{:<36} {}", intent.as_str(), intent.title());
            }
        }
    }

    Ok(())
}

async fn run_chat(runtime: &Runtime) -> Result<()> {
    let mut conversation = Conversation::new("cli", Utc::now());

    println!("Concourse chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        let outcome = runtime
            .graph
            .run_turn(message, conversation.messages.clone())
            .await;

        println!("\n{}\n", outcome.response());

        conversation.record_exchange(
            message,
            outcome.response(),
            runtime.config.history_turns,
            Utc::now(),
        );
    }

    Ok(())
}

fn parse_slot(raw: &str) -> Result<Slot, String> {
    let (token, tag) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected token=TAG, got `{raw}`"))?;
    if token.is_empty() || tag.is_empty() {
        return Err(format!("expected token=TAG, got `{raw}`"));
    }
    Ok(Slot::new(token, tag))
}

fn parse_score(raw: &str) -> Result<IntentScore, String> {
    let (label, confidence) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected intent=confidence, got `{raw}`"))?;
    let confidence = confidence
        .parse::<f32>()
        .map_err(|error| format!("invalid confidence `{confidence}`: {error}"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence must be within [0, 1], got {confidence}"));
    }
    Ok(IntentScore::new(label, confidence))
}
