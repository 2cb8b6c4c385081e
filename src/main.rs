use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Start => {
            commands::start::execute(&args.config).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Query { action } => {
            commands::query::execute(&args.config, action).await?;
        }
        cli::Commands::Sync { action } => {
            commands::sync::execute(&args.config, action).await?;
        }
        cli::Commands::Version => {
            println!("fleet-metrics v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
