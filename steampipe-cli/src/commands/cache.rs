//! Cache maintenance commands.

use anyhow::Result;

use steampipe_client::{CachingClient, NoSession};

use crate::CacheCommands;

pub async fn handle(cmd: CacheCommands, cell_id: u32) -> Result<()> {
    let client = CachingClient::new(NoSession, cell_id).await?;

    match cmd {
        CacheCommands::Clean => {
            client.clear_caches().await?;
            println!("Cache cleared");
        }
        CacheCommands::Lastuser { username } => match username {
            Some(name) => {
                client.set_lastuser(&name).await?;
                println!("Remembered username: {name}");
            }
            None => match client.lastuser().await {
                Some(name) => println!("{name}"),
                None => println!("No username remembered"),
            },
        },
    }

    Ok(())
}
