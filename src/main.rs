mod cli;

use clap::Parser;
use log::error;

use cli::Cli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = kline_cache::app::run(&cli.config, cli.command.into_command()).await {
        error!("{}", err);
        std::process::exit(err.exit_code());
    }
}
