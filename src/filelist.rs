use crate::cache::MetaCache;
use crate::meta::FileMeta;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Ordered sequence of input files plus their metadata. Paths are only ever
/// appended or re-ordered, never removed, and every path has a metadata
/// entry (possibly all-`None`) before any sort or report step runs.
pub struct FileList {
    paths: Vec<PathBuf>,
    meta: HashMap<PathBuf, FileMeta>,
}

impl FileList {
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            meta: HashMap::new(),
        }
    }

    /// Canonicalizes `path`, pulls its metadata through the cache
    /// (extracting on a miss), and appends it. Call order is the "none"
    /// sort order.
    pub fn add_file<F>(&mut self, path: &Path, cache: &mut MetaCache, extract: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<FileMeta>,
    {
        let path = path
            .canonicalize()
            .with_context(|| format!("cannot resolve input file {}", path.display()))?;
        let meta = cache.get(&path, extract)?;
        self.insert(path, meta);
        Ok(())
    }

    fn insert(&mut self, path: PathBuf, meta: FileMeta) {
        self.meta.insert(path.clone(), meta);
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn meta(&self, path: &Path) -> Option<&FileMeta> {
        self.meta.get(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn sort_by_filename(&mut self) {
        self.paths
            .sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    }

    pub fn sort_by_path(&mut self) {
        self.paths.sort();
    }

    /// Stable sort by recording timestamp. Files without one sort as the
    /// epoch, grouping them visibly at the front instead of interleaving
    /// them unpredictably; each one is warned about.
    pub fn sort_by_datetime(&mut self) {
        let epoch = DateTime::<Utc>::UNIX_EPOCH.naive_utc();
        let mut keyed: Vec<(NaiveDateTime, PathBuf)> = std::mem::take(&mut self.paths)
            .into_iter()
            .map(|p| {
                let key = match self.meta.get(&p).and_then(|m| m.recorded_at) {
                    Some(dt) => dt,
                    None => {
                        warn!("No recorded date for {}; inserting at beginning", p.display());
                        epoch
                    }
                };
                (key, p)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.paths = keyed.into_iter().map(|(_, p)| p).collect();
    }

    /// Sum of all durations, or `None` if any file's duration is unknown —
    /// an unknown member makes the total unknown, not zero.
    pub fn total_duration_ms(&self) -> Option<u64> {
        self.paths
            .iter()
            .map(|p| self.meta.get(p).and_then(|m| m.duration_ms))
            .try_fold(0u64, |acc, d| d.map(|d| acc + d))
    }
}

impl Default for FileList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn meta_at(y: i32, mo: u32, d: u32) -> FileMeta {
        FileMeta {
            recorded_at: NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(12, 0, 0),
            duration_ms: Some(1000),
            frame_count: Some(25),
        }
    }

    fn list_of(entries: Vec<(&str, FileMeta)>) -> FileList {
        let mut list = FileList::new();
        for (path, meta) in entries {
            list.insert(PathBuf::from(path), meta);
        }
        list
    }

    #[test]
    fn sort_by_datetime_orders_by_recording_time() {
        // Added as [F3, F1, F2]; timestamps T1 < T2 < T3.
        let mut list = list_of(vec![
            ("/v/f3.mp4", meta_at(2020, 3, 1)),
            ("/v/f1.mp4", meta_at(2020, 1, 1)),
            ("/v/f2.mp4", meta_at(2020, 2, 1)),
        ]);
        list.sort_by_datetime();
        let names: Vec<_> = list.paths().iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(names, ["/v/f1.mp4", "/v/f2.mp4", "/v/f3.mp4"]);
    }

    #[test]
    fn dateless_files_sort_first() {
        let mut list = list_of(vec![
            ("/v/dated.mp4", meta_at(1999, 1, 1)),
            ("/v/undated.mp4", FileMeta::default()),
        ]);
        list.sort_by_datetime();
        assert_eq!(list.paths()[0], PathBuf::from("/v/undated.mp4"));

        // Insertion order must not matter.
        let mut list = list_of(vec![
            ("/v/undated.mp4", FileMeta::default()),
            ("/v/dated.mp4", meta_at(1999, 1, 1)),
        ]);
        list.sort_by_datetime();
        assert_eq!(list.paths()[0], PathBuf::from("/v/undated.mp4"));
    }

    #[test]
    fn sort_by_filename_is_idempotent_and_lexicographic() {
        let mut list = list_of(vec![
            ("/b/ccc.mp4", FileMeta::default()),
            ("/z/aaa.mp4", FileMeta::default()),
            ("/a/bbb.mp4", FileMeta::default()),
        ]);
        list.sort_by_filename();
        let once: Vec<_> = list.paths().to_vec();
        list.sort_by_filename();
        assert_eq!(list.paths(), once.as_slice());
        let names: Vec<_> = list
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["aaa.mp4", "bbb.mp4", "ccc.mp4"]);
    }

    #[test]
    fn sort_by_path_uses_full_path() {
        let mut list = list_of(vec![
            ("/z/aaa.mp4", FileMeta::default()),
            ("/a/bbb.mp4", FileMeta::default()),
        ]);
        list.sort_by_path();
        assert_eq!(list.paths()[0], PathBuf::from("/a/bbb.mp4"));
    }

    #[test]
    fn total_duration_sums_known_values() {
        let list = list_of(vec![
            ("/v/a.mp4", meta_at(2020, 1, 1)),
            ("/v/b.mp4", meta_at(2020, 1, 2)),
        ]);
        assert_eq!(list.total_duration_ms(), Some(2000));
    }

    #[test]
    fn total_duration_is_none_when_any_member_is_unknown() {
        let list = list_of(vec![
            ("/v/a.mp4", meta_at(2020, 1, 1)),
            ("/v/b.mp4", FileMeta::default()),
        ]);
        assert_eq!(list.total_duration_ms(), None);
    }
}
