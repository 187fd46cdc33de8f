//! List stored files.

use console::style;

use crate::{Result, cmd::Target};

pub async fn execute(target: &Target, json: bool) -> Result<()> {
   let client = target.connect().await?;
   let stored = client.get_stored_files().await?;

   if json {
      println!("{}", serde_json::to_string_pretty(&stored)?);
      return Ok(());
   }
   if stored.is_empty() {
      println!("{}", style("No files stored").dim());
      return Ok(());
   }
   for file in &stored.files {
      println!("{}", file.display());
   }
   println!(
      "{}",
      style(format!(
         "{} files in {} directories",
         stored.files.len(),
         stored.directories.len()
      ))
      .dim()
   );
   Ok(())
}
