use crate::filelist::FileList;
use crate::meta::FileMeta;
use crate::util::ms_to_mm_ss_ms;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";
const SRT_FLASH_MS: u64 = 5_000;

/// One row of any report: a scene plus its running offsets. Offsets only
/// accumulate over known durations, matching the reports' UNKNOWN cells.
struct SceneRow<'a> {
    index: usize,
    path: &'a Path,
    meta: &'a FileMeta,
    offset_ms: u64,
    offset_frames: u64,
}

fn scene_rows(files: &FileList) -> Vec<SceneRow<'_>> {
    let mut rows = Vec::with_capacity(files.len());
    let mut offset_ms = 0u64;
    let mut offset_frames = 0u64;
    static EMPTY: FileMeta = FileMeta {
        recorded_at: None,
        duration_ms: None,
        frame_count: None,
    };

    for (i, path) in files.paths().iter().enumerate() {
        let meta = files.meta(path).unwrap_or(&EMPTY);
        rows.push(SceneRow {
            index: i + 1,
            path,
            meta,
            offset_ms,
            offset_frames,
        });
        if let Some(ms) = meta.duration_ms {
            offset_ms += ms;
        }
        if let Some(frames) = meta.frame_count {
            offset_frames += frames;
        }
    }
    rows
}

/// Plain-text scene listing, one block per input file.
pub fn write_txt_report(path: &Path, files: &FileList) -> Result<()> {
    let mut txt = BufWriter::new(
        File::create(path).with_context(|| format!("cannot write {}", path.display()))?,
    );

    for row in scene_rows(files) {
        let meta = row.meta;
        writeln!(txt, "Scene {}", row.index)?;
        writeln!(txt, "  Offset (mm:ss.ms)   : {}", ms_to_mm_ss_ms(row.offset_ms))?;
        writeln!(txt, "  Offset (ms)         : {}", row.offset_ms)?;
        writeln!(txt, "  Offset (frames)     : {}", row.offset_frames)?;
        writeln!(
            txt,
            "  Record date/time    : {}",
            meta.recorded_at
                .map(|dt| dt.format(TIME_FMT).to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string())
        )?;
        writeln!(
            txt,
            "  Duration (mm:ss.ms) : {}",
            meta.duration_ms
                .map(ms_to_mm_ss_ms)
                .unwrap_or_else(|| "UNKNOWN".to_string())
        )?;
        writeln!(
            txt,
            "  Duration (ms)       : {}",
            meta.duration_ms
                .map(|d| d.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string())
        )?;
        writeln!(
            txt,
            "  Duration (frames)   : {}",
            meta.frame_count
                .map(|f| f.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string())
        )?;
        writeln!(txt, "  Source filename     : {}", row.path.display())?;
        writeln!(txt)?;
    }

    txt.flush()?;
    Ok(())
}

/// Spreadsheet report as CSV, same columns the scene listing uses. Unknown
/// values become empty cells.
pub fn write_csv_report(path: &Path, files: &FileList) -> Result<()> {
    let mut csv = csv::Writer::from_path(path)
        .with_context(|| format!("cannot write {}", path.display()))?;

    csv.write_record([
        "Offset mm:ss.ms",
        "Offset ms",
        "Offset frames",
        "Record date/time",
        "Duration mm:ss.ms",
        "Duration ms",
        "Duration frames",
        "Source filename",
    ])?;

    for row in scene_rows(files) {
        let meta = row.meta;
        csv.write_record([
            ms_to_mm_ss_ms(row.offset_ms),
            row.offset_ms.to_string(),
            row.offset_frames.to_string(),
            meta.recorded_at
                .map(|dt| dt.format(TIME_FMT).to_string())
                .unwrap_or_default(),
            meta.duration_ms.map(ms_to_mm_ss_ms).unwrap_or_default(),
            meta.duration_ms
                .map(|d| d.to_string())
                .unwrap_or_default(),
            meta.frame_count
                .map(|f| f.to_string())
                .unwrap_or_default(),
            row.path.display().to_string(),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

fn srt_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// SRT "subtitles" that flash each scene's recording date at the scene's
/// offset in the concatenated output. Scenes without a date are skipped;
/// SRT wants CRLF line endings.
pub fn write_srt(path: &Path, files: &FileList) -> Result<()> {
    let mut srt = BufWriter::new(
        File::create(path).with_context(|| format!("cannot write {}", path.display()))?,
    );

    for row in scene_rows(files) {
        if let Some(dt) = row.meta.recorded_at {
            write!(srt, "{}\r\n", row.index)?;
            write!(
                srt,
                "{} --> {}\r\n",
                srt_timestamp(row.offset_ms),
                srt_timestamp(row.offset_ms + SRT_FLASH_MS)
            )?;
            write!(srt, "{}\r\n\r\n", dt.format(TIME_FMT))?;
        }
    }

    srt.flush()?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct Collection {
    files: Vec<PathBuf>,
}

/// Writes the current ordering as a collection file so a later run can
/// reuse it (with e.g. a different preset) via --in-collection.
pub fn write_collection(path: &Path, files: &FileList) -> Result<()> {
    let collection = Collection {
        files: files.paths().to_vec(),
    };
    let out = File::create(path).with_context(|| format!("cannot write {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(out), &collection)?;
    Ok(())
}

/// Reads a collection file back into an input list. Relative entries are
/// resolved against the collection file's own directory.
pub fn read_collection(path: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(path)
        .with_context(|| format!("cannot read collection file {}", path.display()))?;
    let collection: Collection = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("invalid collection file {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(collection
        .files
        .into_iter()
        .map(|f| if f.is_absolute() { f } else { base.join(f) })
        .collect())
}
