//! Restart the daemon.

use console::style;

use crate::{Result, cmd::Target};

pub async fn execute(target: &Target) -> Result<()> {
   let manager = target.manager()?;
   manager.restart().await?;
   println!("{}", style("Daemon restarted").green());
   Ok(())
}
