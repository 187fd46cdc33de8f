//! Similarity query against the store.

use console::style;

use crate::{Result, cmd::Target, types::SimilarDocument};

const PREVIEW_LINES: usize = 4;

pub async fn execute(target: &Target, text: &str, n_results: usize, json: bool) -> Result<()> {
   let client = target.connect().await?;
   let hits = client.query_similar(text, n_results).await?;

   if json {
      println!("{}", serde_json::to_string_pretty(&hits)?);
      return Ok(());
   }
   if hits.is_empty() {
      println!("{}", style("No matches").dim());
      return Ok(());
   }
   for (rank, hit) in hits.iter().enumerate() {
      print_hit(rank + 1, hit);
   }
   Ok(())
}

fn print_hit(rank: usize, hit: &SimilarDocument) {
   let path = hit.file_path().unwrap_or("<unknown>");
   println!("{} {}", style(format!("{rank}.")).dim(), style(path).cyan().bold());
   for line in hit.content.lines().take(PREVIEW_LINES) {
      println!("   {}", style(line).dim());
   }
}
