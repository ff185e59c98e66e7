use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod auth;
mod cli;
mod config;
mod provider;
mod storage;
mod template;
mod tools;

use cli::commands::{self, App};
use config::Overrides;

#[derive(Parser)]
#[command(name = "kakao-tools", version, about = "KakaoTalk messaging and calendar tools for assistants")]
struct Cli {
    /// Config file (default: <config dir>/kakao-tools/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Accounts file listing the accounts tools may act for
    #[arg(long, global = true)]
    accounts_file: Option<PathBuf>,

    /// Directory holding stored OAuth credentials
    #[arg(long, global = true)]
    credentials_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize an account via the browser and store its credentials
    Auth {
        /// Account email (must be listed in the accounts file)
        account: Option<String>,
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Credential health for every configured account
    Status,

    /// Print tool descriptions as JSON
    Tools,

    /// Run one tool and print its result as JSON
    Call {
        /// Tool name (e.g. send_text_template_to_me)
        tool: String,
        /// Tool arguments as a JSON object, including __email_address__
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Serve tools over stdio (JSON-RPC)
    Serve {
        /// Report authorization URLs instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Serve the /authorize and /callback endpoints over HTTP
    Web {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: String,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout is reserved for command and protocol output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        config: cli.config,
        accounts_file: cli.accounts_file,
        credentials_dir: cli.credentials_dir,
    };
    let app = App::load(&overrides)?;

    match &cli.command {
        Commands::Auth {
            account,
            no_browser,
        } => commands::cmd_auth(&app, account.as_deref(), *no_browser),
        Commands::Status => commands::cmd_status(&app),
        Commands::Tools => commands::cmd_tools(&app),
        Commands::Call { tool, args } => commands::cmd_call(&app, tool, args),
        Commands::Serve { no_browser } => commands::cmd_serve(&app, *no_browser),
        Commands::Web { bind } => commands::cmd_web(&app, bind),
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
