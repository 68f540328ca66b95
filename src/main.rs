use anyhow::Context;
use clap::Parser;

use cass_memory::cli::{handlers, Cli};
use cass_memory::config::Config;

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load().context("failed to load configuration")?;
    config.json_output = cli.json;
    config.verbose = config.verbose || cli.verbose;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    cass_memory::logging::init(config.verbose);

    let exit_code = handlers::run(cli, &config).await;
    std::process::exit(exit_code);
}
