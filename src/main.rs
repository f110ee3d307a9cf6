use envconfig::Envconfig;

use market_sync::app;
use market_sync::config::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cfg = Config::init_from_env()?;

    app::build(&cfg)?.run().await?;

    Ok(())
}
