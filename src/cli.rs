//! Code related to CLI things
//!

use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::ConfigFile;

#[derive(Parser, Clone)]
pub struct SharedOpts {
    #[clap(short, long, help = "Configuration file")]
    pub config: Option<String>,
    #[clap(short, long)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server
    Server {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
    /// Validate the configuration file and exit
    ConfigCheck {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
    /// Print a default configuration to stdout
    ExportConfig,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Server {
            sopt: SharedOpts {
                config: None,
                debug: false,
            },
        }
    }
}

#[derive(Parser)]
#[command(arg_required_else_help(false))]
/// REST management API for dehydrated's domains file. With plugins.
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output a default configuration file, based on the
/// [crate::config::ConfigFile] object. JSON is a YAML subset, so the
/// output loads straight back in.
pub fn export_config() {
    let output = match serde_json::to_string_pretty(&ConfigFile::default()) {
        Ok(value) => value,
        Err(_) => {
            error!("I don't know how, but we couldn't serialize our own config file default.");
            "".to_string()
        }
    };
    println!("{output}");
}
