//! Remove every stored file.

use std::{collections::BTreeSet, path::PathBuf};

use console::style;

use crate::{Result, client::VectorStoreClient, cmd::Target};

pub async fn execute(target: &Target) -> Result<()> {
   let client = target.connect().await?;
   let removed = remove_all(&client).await?;
   if removed.is_empty() {
      println!("{}", style("Store already empty").dim());
   } else {
      println!("{}", style(format!("Removed {} files", removed.len())).green().bold());
   }
   Ok(())
}

/// Lists the store and removes everything in it.
pub async fn remove_all(client: &VectorStoreClient) -> Result<BTreeSet<PathBuf>> {
   let stored = client.get_stored_files().await?;
   if stored.files.is_empty() {
      return Ok(BTreeSet::new());
   }
   let files: Vec<PathBuf> = stored.files.into_iter().collect();
   tracing::info!("removing {} stored files", files.len());
   client.remove_files(&files).await
}
