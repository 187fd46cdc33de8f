//! Stop the daemon.

use console::style;

use crate::{Result, cmd::Target};

pub async fn execute(target: &Target) -> Result<()> {
   let manager = target.manager()?;
   if manager.stop().await? {
      println!("{}", style("Daemon stopped").green());
   } else {
      println!("{}", style("No daemon running").yellow());
   }
   Ok(())
}
