//! Utility functions for filesystem operations

use std::{
   fs,
   io::{self, Read, Seek, SeekFrom, Write},
   path::{Path, PathBuf},
};

use crate::{Error, Result};

/// Writes `data` to a sibling temp file, syncs it and renames it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   let tmp_path = temp_path(path)?;
   {
      let mut file = fs::File::create(&tmp_path)?;
      file.write_all(data)?;
      file.sync_all()?;
   }
   fs::rename(&tmp_path, path)?;
   Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf> {
   let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| Error::Server {
         op:     "write",
         reason: format!("invalid file path {}", path.display()),
      })?;
   Ok(path.with_file_name(format!(".{name}.tmp")))
}

/// Returns at most the last `max_bytes` of a file, starting at a line
/// boundary. Missing or unreadable files yield an empty string.
pub fn read_tail(path: &Path, max_bytes: u64) -> String {
   read_tail_inner(path, max_bytes).unwrap_or_default()
}

fn read_tail_inner(path: &Path, max_bytes: u64) -> io::Result<String> {
   let mut file = fs::File::open(path)?;
   let len = file.metadata()?.len();
   let start = len.saturating_sub(max_bytes);
   file.seek(SeekFrom::Start(start))?;
   let mut buf = Vec::new();
   file.read_to_end(&mut buf)?;
   let text = String::from_utf8_lossy(&buf).into_owned();
   if start == 0 {
      return Ok(text);
   }
   Ok(match text.find('\n') {
      Some(idx) => text[idx + 1..].to_string(),
      None => text,
   })
}
