use clap::{Args, Parser};
use std::error::Error;
use std::path::PathBuf;

mod app;
mod config;
mod logging;
mod seed;

use config::Config;

#[derive(Parser)]
#[command(about = "Routing state engine for a multi-tenant edge gateway")]
enum CliCommand {
    /// Runs the gateway until interrupted
    Run(ConfigArgs),
    /// Loads and validates a config file, then exits
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Validate(args) => {
            Config::from_file(&args.config)?;
            println!("{}: ok", args.config.display());
        }
        CliCommand::Run(args) => {
            let config = Config::from_file(&args.config)?;

            // Held until exit so pending sentry events are flushed
            let _sentry = logging::init_logging(&config.logging)?;
            if let Some(metrics) = &config.metrics {
                logging::init_metrics(metrics)?;
            }

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(app::run(config))?;
        }
    }

    Ok(())
}
