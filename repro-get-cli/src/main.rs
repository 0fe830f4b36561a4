use anyhow::Result;
use clap::Parser;

mod cache_cmd;
mod cli;
mod dockerfile;
mod download;
mod hash;
mod info;
mod install;
mod ipfs;

use cli::{CacheCommands, Commands, DockerfileCommands, HashCommands, IpfsCommands, RootOptions};

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = RootOptions::parse();
    let debug = opts.global.debug || repro_get::env::boolean("DEBUG", false);
    init_logging(debug);

    match &opts.command {
        Commands::Info(cmd_opts) => info::run(&opts.global, cmd_opts),
        Commands::Install(cmd_opts) => install::run(&opts.global, cmd_opts).await,
        Commands::Download(cmd_opts) => download::run(&opts.global, cmd_opts).await,
        Commands::Hash(HashCommands::Generate(cmd_opts)) => {
            hash::generate(&opts.global, cmd_opts).await
        }
        Commands::Hash(HashCommands::Inspect(cmd_opts)) => hash::inspect(cmd_opts),
        Commands::Hash(HashCommands::Update(cmd_opts)) => hash::update(&opts.global, cmd_opts).await,
        Commands::Cache(CacheCommands::Import(cmd_opts)) => {
            cache_cmd::import(&opts.global, cmd_opts).await
        }
        Commands::Cache(CacheCommands::Export(cmd_opts)) => cache_cmd::export(&opts.global, cmd_opts),
        Commands::Cache(CacheCommands::Clean) => cache_cmd::clean(&opts.global),
        Commands::Ipfs(IpfsCommands::Push(cmd_opts)) => ipfs::push(&opts.global, cmd_opts).await,
        Commands::Dockerfile(DockerfileCommands::Generate(cmd_opts)) => {
            dockerfile::generate(&opts.global, cmd_opts).await
        }
    }
}
