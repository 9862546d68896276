use anyhow::{bail, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Ask before clobbering an existing file. `--overwrite` skips this.
pub fn confirm_overwrite(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    print!("File '{}' already exists. Overwrite (y/N)? ", path.display());
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if !answer.trim_start().to_lowercase().starts_with('y') {
        bail!("File '{}' already exists.", path.display());
    }
    Ok(())
}

pub fn replace_extension(path: &Path, new_ext: &str) -> PathBuf {
    path.with_extension(new_ext)
}

/// mm:ss.ms, minutes unbounded (a 2h file prints as 120:00.000).
pub fn ms_to_mm_ss_ms(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
}

/// hh:mm:ss.ms for log output about the whole run.
pub fn ms_to_hh_mm_ss(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
