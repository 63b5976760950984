#[cfg(not(unix))]
compile_error!("Only unix targets are currently supported");

use relay_common::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = relay::config::discover()?;
    relay::run_coordinator(config).await
}
