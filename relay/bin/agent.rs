#[cfg(not(unix))]
compile_error!("Only unix targets are currently supported");

use clap::Parser;
use relay_agent::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse();
    relay::init_agent_logging(&config);

    relay::run_agent(config).await
}
