use std::error::Error;

use solis_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let options = Options::new();

    // Logging is installed by run() once the config-derived level is known.
    let config = Config::new(options.config_file)?;
    solis_bridge::run(config).await?;

    Ok(())
}
