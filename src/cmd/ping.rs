//! Liveness check that never spawns a daemon.

use console::style;

use crate::{Error, Result, cmd::Target};

pub async fn execute(target: &Target) -> Result<()> {
   let manager = target.manager()?;
   if manager.is_alive().await {
      println!("{}", style("pong").green());
      return Ok(());
   }
   Err(Error::ServiceUnavailable {
      reason: format!("no daemon answering at {}", manager.socket_path().display()),
      output: String::new(),
   })
}
