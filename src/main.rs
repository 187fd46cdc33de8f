use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vectord::{
   Result,
   cmd::{self, Target},
   config,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for vectord
#[derive(Parser)]
#[command(name = "vectord")]
#[command(about = "Background vector store daemon for repository files")]
#[command(version)]
struct Cli {
   #[arg(long, global = true, env = "VECTORD_REPO", help = "Repository root (default: cwd)")]
   repo: Option<PathBuf>,

   #[arg(long, global = true, help = "Directory for the socket, PID file and daemon log")]
   runtime_dir: Option<PathBuf>,

   #[arg(long, global = true, help = "Collection name (default from config)")]
   collection: Option<String>,

   #[arg(short, long, global = true, help = "Verbose logging")]
   verbose: bool,

   #[command(subcommand)]
   command: Cmd,
}

/// Available subcommands for vectord
#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Run the daemon in the foreground")]
   Serve {
      #[arg(value_name = "RUNTIME_DIR", help = "Runtime directory to listen in")]
      dir: PathBuf,
   },

   #[command(about = "Add or replace files in the store")]
   Add {
      #[arg(required = true, help = "Files to add")]
      paths: Vec<PathBuf>,
   },

   #[command(about = "Remove files from the store")]
   Remove {
      #[arg(required = true, help = "Files to remove")]
      paths: Vec<PathBuf>,
   },

   #[command(about = "Find stored files similar to a text")]
   Query {
      #[arg(help = "Query text")]
      text: String,

      #[arg(short = 'n', long, default_value = "5", help = "Number of results")]
      n_results: usize,

      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Remove all files from the store")]
   Clean,

   #[command(about = "List stored files")]
   List {
      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Check whether the daemon is answering")]
   Ping,

   #[command(about = "Restart the daemon")]
   Restart,

   #[command(about = "Stop the daemon")]
   Kill,

   #[command(about = "Print the effective configuration")]
   Config {
      #[arg(long, help = "Write the default config file if it does not exist")]
      init: bool,
   },
}

#[tokio::main]
async fn main() {
   let cli = Cli::parse();
   init_tracing(&cli);

   if let Err(err) = run(cli).await {
      eprintln!("{err}");
      std::process::exit(err.exit_code());
   }
}

fn init_tracing(cli: &Cli) {
   let serving = matches!(cli.command, Cmd::Serve { .. });
   let level = if cli.verbose {
      Level::DEBUG
   } else if serving {
      Level::INFO
   } else {
      Level::WARN
   };
   let filter = EnvFilter::builder()
      .with_default_directive(level.into())
      .from_env_lossy();
   tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_ansi(!serving)
      .with_writer(std::io::stderr)
      .init();
}

async fn run(cli: Cli) -> Result<()> {
   let mut cfg = config::get().clone();
   if let Some(dir) = cli.runtime_dir {
      cfg.runtime_dir = Some(dir);
   }
   cfg.validate()?;

   let repo = match cli.repo {
      Some(repo) => cmd::absolutize(&repo)?,
      None => std::env::current_dir()?,
   };
   let target = Target { repo, collection: cli.collection, config: cfg };

   match cli.command {
      Cmd::Serve { dir } => cmd::serve::execute(dir, target.config).await,
      Cmd::Add { paths } => cmd::add::execute(&target, paths).await,
      Cmd::Remove { paths } => cmd::remove::execute(&target, paths).await,
      Cmd::Query { text, n_results, json } => {
         cmd::query::execute(&target, &text, n_results, json).await
      },
      Cmd::Clean => cmd::clean::execute(&target).await,
      Cmd::List { json } => cmd::list::execute(&target, json).await,
      Cmd::Ping => cmd::ping::execute(&target).await,
      Cmd::Restart => cmd::restart::execute(&target).await,
      Cmd::Kill => cmd::kill::execute(&target).await,
      Cmd::Config { init } => cmd::config::execute(&target.config, init),
   }
}
