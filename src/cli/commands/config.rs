use crate::cli::context::AppContext;
use crate::config::{AppConfig, SyncConfig};
use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use colored::*;

#[derive(Args)]
pub struct ConfigCommands {
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Write a config file with the chosen preset
    Init {
        #[arg(long, value_enum, default_value_t = Preset::Default)]
        preset: Preset,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    Default,
    /// Slower reconnects and more retries for cellular links
    Cellular,
    /// Fast timings against a local backend
    Development,
}

impl Preset {
    fn sync_config(self) -> SyncConfig {
        match self {
            Preset::Default => SyncConfig::default(),
            Preset::Cellular => SyncConfig::cellular(),
            Preset::Development => SyncConfig::development(),
        }
    }
}

pub async fn config_command(ctx: &AppContext, cmd: ConfigCommands) -> Result<()> {
    match cmd.command {
        ConfigSubcommands::Show => {
            println!("{}", format!("# {}", ctx.config_path.display()).dimmed());
            print!("{}", ctx.config.to_toml()?);
            Ok(())
        }
        ConfigSubcommands::Path => {
            println!("{}", ctx.config_path.display());
            Ok(())
        }
        ConfigSubcommands::Init { preset, force } => {
            if ctx.config_path.exists() && !force {
                anyhow::bail!("{} already exists, pass --force to overwrite", ctx.config_path.display());
            }
            let config = AppConfig::default().with_sync(&preset.sync_config());
            config.save_to(&ctx.config_path)?;
            println!(
                "{} Wrote {:?} preset to {}",
                "✓".bright_green().bold(),
                preset,
                ctx.config_path.display().to_string().cyan()
            );
            Ok(())
        }
    }
}
