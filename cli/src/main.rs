use clap::{Parser, Subcommand};
use toolbridge_mcp_runtime::McpCommands;

mod commands;
mod util;

use commands::catalog::CatalogCommands;
use commands::token::TokenCommands;

#[derive(Parser)]
#[command(
    name = "toolbridge",
    version,
    about = "Toolbridge CLI: inspect the backend catalog, mint dev credentials, run the MCP server"
)]
struct Cli {
    /// Toolbridge API base URL
    #[arg(long, env = "TOOLBRIDGE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Bearer token for authenticated API calls
    #[arg(long, env = "TOOLBRIDGE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print compact JSON instead of pretty JSON
    #[arg(long)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Catalog inspection and refresh
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Print the encrypted development MCP endpoint for a subject
    DevUrl {
        /// Subject the endpoint authenticates as
        #[arg(long)]
        subject: String,
        /// Dev endpoint key (otherwise TOOLBRIDGE_DEV_ENDPOINT_KEY)
        #[arg(long, env = "TOOLBRIDGE_DEV_ENDPOINT_KEY", hide_env_values = true)]
        key: Option<String>,
    },
    /// Development token operations
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// MCP server over stdio
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout is reserved for command output and MCP frames
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,toolbridge_mcp_runtime=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let token = cli.token.as_deref();

    let code = match cli.command {
        Commands::Health => {
            util::api_request(&cli.api_url, reqwest::Method::GET, "/health", None, cli.raw).await
        }
        Commands::Catalog { command } => {
            commands::catalog::run(&cli.api_url, token, cli.raw, command).await
        }
        Commands::DevUrl { subject, key } => {
            commands::dev_url::run(&cli.api_url, key.as_deref(), &subject, cli.raw)
        }
        Commands::Token { command } => commands::token::run(cli.raw, command),
        Commands::Mcp { command } => toolbridge_mcp_runtime::run(command).await,
    };

    std::process::exit(code);
}
