//! Remove files from the store.

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
   let removed = client.remove_files(&paths).await?;

   for path in &removed {
      println!("  {} {}", style("-").red(), path.display());
   }
   println!("{}", style(format!("Removed {} files", removed.len())).green().bold());
   let missing = paths.len().saturating_sub(removed.len());
   if missing > 0 {
      println!("{}", style(format!("{missing} were not stored")).dim());
   }
   Ok(())
}
