//! Config command implementation.

use anyhow::{Context, Result};

use parley_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = super::load_config();
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Reset => {
            let path = Config::config_path();
            Config::default()
                .save_to(&path)
                .with_context(|| format!("Could not write {}", path.display()))?;
            println!("Configuration reset: {}", path.display());
        }
    }
    Ok(())
}
