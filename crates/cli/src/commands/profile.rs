//! `emberkeep profile` - Show or update the durable profile.

use std::collections::BTreeMap;

use emberkeep_config::AppConfig;
use emberkeep_memory::ProfileStore;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = ProfileStore::new(config.profile_path());

    let profile = store.load().await?;

    println!();
    for (key, value) in profile.ordered_fields() {
        println!("  {key:<16} {value}");
    }
    println!();

    Ok(())
}

pub async fn set(fields: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let updates = parse_pairs(&fields)?;
    let count = updates.len();

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = ProfileStore::new(config.profile_path());
    store.set(updates).await?;

    println!("Updated {count} profile field(s).");

    Ok(())
}

/// Parse `KEY=VALUE` arguments into a field map. The value may itself
/// contain `=`; only the first one splits.
fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut updates = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("Expected KEY=VALUE, got '{pair}'"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Expected KEY=VALUE, got '{pair}'"));
        }
        updates.insert(key.to_string(), value.trim().to_string());
    }
    Ok(updates)
}
