//! `emberkeep serve` - Run the HTTP gateway.

use emberkeep_config::AppConfig;

pub async fn run(host: Option<String>, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!();
    println!("  Emberkeep gateway");
    println!("  Listening:  http://{}:{}", config.gateway.host, config.gateway.port);
    println!("  Backend:    {} ({})", config.backend.base_url, config.backend.model);
    println!("  Data dir:   {}", config.data_dir.display());
    println!();

    emberkeep_gateway::start(config).await
}
