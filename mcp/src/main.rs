use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vision_mcp_runtime::{DEFAULT_API_URL, McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "vision-mcp",
    version,
    about = "1492.Vision MCP server over stdio"
)]
struct Cli {
    /// 1492.Vision API base URL
    #[arg(long, env = "VISION_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vision_mcp=info,vision_mcp_runtime=info,vision_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let code = run_mcp(&cli.api_url, cli.command).await;
    std::process::exit(code);
}
