use crate::meta::FileMeta;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Locations of the external tools the whole run depends on. Resolved once
/// at startup so a missing tool fails before any file is touched.
pub struct MediaTools {
    mediainfo: PathBuf,
    ffmpeg: PathBuf,
}

impl MediaTools {
    pub fn discover() -> Result<Self> {
        let mediainfo = which::which("mediainfo").map_err(|_| {
            anyhow::anyhow!(
                "mediainfo commandline tool not found. Use e.g. sudo apt install mediainfo \
                 (on Debian/Ubuntu) or choco install mediainfo-cli (on Windows with Chocolatey) \
                 to install it."
            )
        })?;
        let ffmpeg = which::which("ffmpeg")
            .or_else(|_| which::which("avconv"))
            .map_err(|_| {
                anyhow::anyhow!(
                    "ffmpeg or avconv commandline tool not found. Use e.g. sudo apt install \
                     ffmpeg (on Debian/Ubuntu) or choco install ffmpeg (on Windows with \
                     Chocolatey) to install it."
                )
            })?;
        Ok(Self { mediainfo, ffmpeg })
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Runs `mediainfo --fullscan` against `path` and parses its output.
    /// Missing or unparseable fields stay `None`; only failing to run the
    /// tool at all is an error.
    pub fn extract_meta(&self, path: &Path) -> Result<FileMeta> {
        let output = Command::new(&self.mediainfo)
            .arg("--fullscan")
            .arg(path)
            .output()
            .with_context(|| format!("failed to run mediainfo on {}", path.display()))?;
        if !output.status.success() {
            debug!(
                "mediainfo exited with {} for {}",
                output.status,
                path.display()
            );
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(parse_mediainfo_output(&text))
    }
}

/// Line scanner over mediainfo's text output. Each field is taken from the
/// first line whose value parses; later candidates for an already-set field
/// are ignored.
pub fn parse_mediainfo_output(text: &str) -> FileMeta {
    let mut meta = FileMeta::default();

    for line in text.lines() {
        if meta.recorded_at.is_none() {
            if line.starts_with("Recorded date") {
                meta.recorded_at = field_value(line).and_then(parse_recorded_date);
            } else if line.starts_with("Tagged date") {
                meta.recorded_at = field_value(line).and_then(parse_tagged_date);
            }
        }
        if meta.duration_ms.is_none() && line.starts_with("Duration") {
            meta.duration_ms = field_value(line).and_then(|v| v.parse().ok());
        }
        if meta.frame_count.is_none() && line.starts_with("Frame count") {
            meta.frame_count = field_value(line).and_then(|v| v.parse().ok());
        }
    }

    meta
}

fn field_value(line: &str) -> Option<&str> {
    line.split_once(": ").map(|(_, v)| v.trim())
}

/// "Recorded date" values carry an explicit .000 millisecond suffix.
fn parse_recorded_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S.000").ok()
}

/// "Tagged date" values are prefixed with a timezone label ("UTC 2021-…");
/// the label is informational only and dropped before parsing.
fn parse_tagged_date(value: &str) -> Option<NaiveDateTime> {
    let (_zone, rest) = value.split_once(' ')?;
    NaiveDateTime::parse_from_str(rest.trim(), "%Y-%m-%d %H:%M:%S").ok()
}
