/// flowgate server entry point
///
/// Loads configuration from `FLOWGATE_*` environment variables and starts the
/// HTTP server. Every stored active workflow is activated before the listener
/// opens.

use flowgate::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
