//! Add files to the store.

use std::path::PathBuf;

use console::style;

use crate::{
   Result,
   cmd::{Target, absolutize},
};

pub async fn execute(target: &Target, paths: Vec<PathBuf>) -> Result<()> {
   let paths = paths
      .iter()
      .map(|p| absolutize(p))
      .collect::<Result<Vec<_>>>()?;
   let client = target.connect().await?;
   let added = client.add_files(&paths).await?;

   for path in &added {
      println!("  {} {}", style("+").green(), path.display());
   }
   let skipped = paths.len().saturating_sub(added.len());
   println!("{}", style(format!("Added {} files", added.len())).green().bold());
   if skipped > 0 {
      println!("{}", style(format!("Skipped {skipped} (not regular files or unreadable)")).yellow());
   }
   Ok(())
}
