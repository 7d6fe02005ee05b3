//! `emberkeep chat` - Interactive session in the terminal.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use emberkeep_backend::OllamaBackend;
use emberkeep_composer::{ComposerBudget, PromptComposer};
use emberkeep_config::AppConfig;
use emberkeep_core::backend::ModelBackend;
use emberkeep_memory::{EpisodeLog, ProfileStore, TurnRecorder};
use emberkeep_session::{ExchangeOutcome, SessionManager};

const EXIT_WORDS: [&str; 5] = ["exit", "quit", "/exit", "/quit", ":q"];

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let profiles = Arc::new(ProfileStore::new(config.profile_path()));
    let log = Arc::new(EpisodeLog::new(config.episodes_path()));
    let recorder = TurnRecorder::new(config.memory.milestone_keywords.clone());

    let composer = PromptComposer::new(
        profiles,
        log.clone(),
        ComposerBudget {
            system: config.composer.system_tokens,
            recent: config.composer.recent_tokens,
            related: config.composer.related_tokens,
        },
    )
    .with_focus(config.composer.focus.clone())
    .with_retrieve_max_items(config.composer.retrieve_max_items);

    let backend: Arc<dyn ModelBackend> = Arc::new(OllamaBackend::new(&config.backend));

    let session = SessionManager::new(log, recorder, composer, backend.clone())
        .with_window_tokens(config.session.window_tokens)
        .with_recent_n(config.composer.recent_n);

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Emberkeep - Memory-Backed Chat        ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Backend:   {}", config.backend.base_url);
    println!("  Model:     {}", config.backend.model);
    println!("  Data dir:  {}", config.data_dir.display());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/reset' to clear the live window, 'exit' to quit.");
    println!();

    if !matches!(backend.health_check().await, Ok(true)) {
        eprintln!(
            "  [Warn] Backend not reachable at {} - replies will fail until it is up.",
            config.backend.base_url
        );
        println!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();

        if EXIT_WORDS.contains(&input) {
            break;
        }

        if input.is_empty() {
            print!("  You > ");
            std::io::stdout().flush()?;
            continue;
        }

        if input == "/reset" {
            session.reset_window().await;
            println!("  (window cleared)");
            print!("  You > ");
            std::io::stdout().flush()?;
            continue;
        }

        println!();
        print!("  Emberkeep > ");
        std::io::stdout().flush()?;

        let outcome = session
            .handle_user_text_streamed(input, |delta| {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            })
            .await;

        match outcome {
            Ok(ExchangeOutcome::Reply(_)) => {
                println!();
                println!();
            }
            Ok(ExchangeOutcome::IgnoredEcho) => {
                println!("(ignored echo)");
                println!();
            }
            Ok(ExchangeOutcome::Empty) => {
                println!("(no reply)");
                println!();
            }
            Err(e) => {
                println!();
                eprintln!("  [Error] {e}");
                println!();
            }
        }

        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}
