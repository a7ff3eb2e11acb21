use clap::Parser;

use dehydrated_api::cli::{export_config, Cli, Commands};
use dehydrated_api::config::ConfigFile;
use dehydrated_api::error::DehydratedApiError;
use dehydrated_api::{logging, servers};

fn load_checked_config(path: Option<&str>) -> Result<ConfigFile, DehydratedApiError> {
    let config = ConfigFile::try_from_file(path)?;
    if let Err(errors) = config.check_config() {
        for error in &errors {
            eprintln!("Config problem: {error}");
        }
        return Err(DehydratedApiError::StartupError(
            "configuration check failed".to_string(),
        ));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let cli = Cli::parse();
    match cli.command.unwrap_or_default() {
        Commands::Server { sopt } => {
            let config = load_checked_config(sopt.config.as_deref())?;
            logging::setup(&config.logging, sopt.debug)
                .map_err(DehydratedApiError::StartupError)?;
            servers::run(config).await?;
            Ok(())
        }
        Commands::ConfigCheck { sopt } => {
            let config = load_checked_config(sopt.config.as_deref())?;
            println!("Config OK: would listen on {}", config.api_listener_address());
            Ok(())
        }
        Commands::ExportConfig => {
            export_config();
            Ok(())
        }
    }
}
