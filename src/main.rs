use clap::Parser;
use pollcast::cli::{self, Cli, Command, ConfigCommand, StartArgs};
use pollcast::{config, logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config.as_deref());

    match cli.command.unwrap_or(Command::Start(StartArgs::default())) {
        Command::Start(args) => {
            let mut cfg = config::load_config(&config_path)?;
            args.apply(&mut cfg);
            logging::init_logging(&cfg.logging)?;
            cli::handle_start(cfg).await?;
        }
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(&config_path)?,
        Command::Config(ConfigCommand::Path) => cli::handle_config_path(&config_path),
        Command::Status { host, port } => cli::handle_status(&host, port, &config_path).await?,
        Command::Snapshot { data } => cli::handle_snapshot(&config_path, data.as_deref())?,
        Command::Version => cli::handle_version(),
    }
    Ok(())
}
