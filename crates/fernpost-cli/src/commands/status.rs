//! Status command handler

use anyhow::Result;

use fernpost_core::{Config, FilePersistence};

use crate::output::{Output, OutputFormat};

/// Show every identity with saved state
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let persistence = FilePersistence::from_config(config);
    let states = persistence.load_all()?;

    match output.format {
        OutputFormat::Json => {
            let identities: Vec<_> = states
                .iter()
                .map(|state| {
                    serde_json::json!({
                        "id": state.id,
                        "address": state.address().to_string(),
                        "local": state.insert_key.is_some(),
                        "locked": state.locked,
                        "following_since": state.following_since,
                        "friends": state.friends.len()
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "state_dir": persistence.dir(),
                    "store_dir": config.store_dir,
                    "insertion_delay_secs": config.insertion_delay_secs,
                    "identities": identities
                })
            );
        }
        OutputFormat::Quiet => {
            for state in &states {
                println!("{}", state.id);
            }
        }
        OutputFormat::Human => {
            println!("fernpost Status");
            println!("===============");
            println!();
            println!("Storage:");
            println!("  State: {}", persistence.dir().display());
            println!("  Store: {}", config.store_dir.display());
            println!();
            println!("Insertion delay: {}s", config.insertion_delay_secs);
            println!();

            if states.is_empty() {
                println!("No identities yet.");
                return Ok(());
            }

            println!("Identities:");
            for state in &states {
                let role = match (&state.insert_key, state.locked) {
                    (Some(_), true) => "local, locked",
                    (Some(_), false) => "local",
                    (None, _) => "followed",
                };
                println!("  {} ({})", state.id, role);
                println!("    Edition: {}", state.address());
                if let Some(since) = state.following_since {
                    println!("    Since:   {}", since.format("%Y-%m-%d %H:%M"));
                }
            }
            println!("\n{} identity(ies)", states.len());
        }
    }

    Ok(())
}
