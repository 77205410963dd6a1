//! `bugpack config`: show the effective configuration.

use crate::exit_codes;
use anyhow::{Context, Result};
use bugpack_core::config::{config_file, load_config};

pub fn execute(path_only: bool) -> Result<i32> {
    if path_only {
        println!("{}", config_file().display());
        return Ok(exit_codes::SUCCESS);
    }

    let config = load_config(None);
    let text = toml::to_string_pretty(&config).context("serializing configuration")?;
    print!("{text}");
    Ok(exit_codes::SUCCESS)
}
