//! Config command handlers

use anyhow::{bail, Context, Result};

use fernpost_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:                {}", config.data_dir.display());
            println!("  store_dir:               {}", config.store_dir.display());
            println!("  insertion_delay_secs:    {}", config.insertion_delay_secs);
            println!("  insert_poll_interval_ms: {}", config.insert_poll_interval_ms);
            println!("  max_image_size:          {}", config.max_image_size);
            println!("  max_html_size:           {}", config.max_html_size);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let number = || -> Result<u64> {
        value
            .parse()
            .with_context(|| format!("Invalid value for {}. Use a whole number.", key))
    };

    match key {
        "data_dir" => config.data_dir = value.into(),
        "store_dir" => config.store_dir = value.into(),
        "insertion_delay_secs" => config.insertion_delay_secs = number()?,
        "insert_poll_interval_ms" => {
            let interval = number()?;
            if interval == 0 {
                bail!("insert_poll_interval_ms must be greater than 0");
            }
            config.insert_poll_interval_ms = interval;
        }
        "max_image_size" => config.max_image_size = number()?,
        "max_html_size" => config.max_html_size = number()?,
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, store_dir, insertion_delay_secs, \
                 insert_poll_interval_ms, max_image_size, max_html_size",
                key
            );
        }
    }
    Ok(())
}
