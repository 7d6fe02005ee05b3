//! `emberkeep log` - Inspect the episodic log.

use chrono::DateTime;

use emberkeep_config::AppConfig;
use emberkeep_core::Episode;
use emberkeep_memory::EpisodeLog;

pub async fn tail(count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let log = EpisodeLog::new(config.episodes_path());

    let mut episodes = log.recent(count);
    // recent() returns newest first; print newest last.
    episodes.reverse();

    if episodes.is_empty() {
        println!("  (log is empty)");
        return Ok(());
    }

    println!();
    for episode in &episodes {
        println!("  {}", format_episode(episode));
    }
    println!();

    Ok(())
}

fn format_episode(episode: &Episode) -> String {
    let when = DateTime::from_timestamp(episode.ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| episode.ts.to_string());
    let tags = if episode.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", episode.tags.join(", "))
    };
    format!("{when}  ({}){tags}  {}", episode.importance, episode.text)
}
