//! Print the effective configuration.

use console::style;

use crate::{
   Result,
   config::{self, Config},
};

pub fn execute(cfg: &Config, init: bool) -> Result<()> {
   let path = config::config_file_path();
   if init {
      if config::write_default_config(path)? {
         println!("{}", style(format!("Wrote {}", path.display())).green());
      } else {
         println!("{}", style(format!("{} already exists", path.display())).yellow());
      }
      return Ok(());
   }
   println!("{}", style(format!("# {}", path.display())).dim());
   print!("{}", cfg.to_toml()?);
   Ok(())
}
