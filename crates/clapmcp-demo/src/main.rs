//! clapmcp-demo: a small text CLI whose commands are also MCP tools.
//!
//! Run `clapmcp-demo upper hello` on the command line, or
//! `clapmcp-demo mcp` to let an MCP client call the same operations.

mod ops;
mod tools;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use clapmcp::{server_and_command, Config, McpArgs};
use ops::{CountInput, UpperInput};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clapmcp-demo")]
#[command(author, version, about = "Text utilities, also served over MCP", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert text to upper case
    Upper(UpperInput),
    /// Count lines, words and characters of text
    Count(CountInput),
    /// Start MCP server
    #[command(long_about = "Start MCP server to handle requests from clients")]
    Mcp(McpArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .with_instructions("Text utilities: upper-case conversion and counting");
    let (server, mcp) = server_and_command(config);

    let matches = Cli::command()
        .mut_subcommand("mcp", |cmd| mcp.apply_defaults(cmd))
        .get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    init_logging(cli.verbose);

    match cli.command {
        Commands::Upper(input) => ops::upper(input, &mut std::io::stdout().lock())?,
        Commands::Count(input) => ops::count(input, &mut std::io::stdout().lock())?,
        Commands::Mcp(args) => {
            tools::register(&server);
            mcp.execute(&args).await;
        }
    }

    Ok(())
}

/// Log to stderr; stdout carries command output or the stdio protocol.
fn init_logging(verbose: bool) {
    let default = if verbose {
        "clapmcp=debug,clapmcp_demo=debug,tower_http=debug"
    } else {
        "clapmcp=info,clapmcp_demo=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}
