use crate::meta::FileMeta;

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

/// Durable path -> metadata map shared across runs. Extraction happens at
/// most once per path per process lifetime; a file changing on disk after
/// it was cached is an accepted staleness tradeoff.
pub struct MetaCache {
    entries: HashMap<PathBuf, FileMeta>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns the cached metadata for `path`, invoking `extract` and
    /// storing its result on a miss.
    pub fn get<F>(&mut self, path: &Path, extract: F) -> Result<FileMeta>
    where
        F: FnOnce(&Path) -> Result<FileMeta>,
    {
        if let Some(meta) = self.entries.get(path) {
            return Ok(meta.clone());
        }
        let meta = extract(path)?;
        self.entries.insert(path.to_path_buf(), meta.clone());
        Ok(meta)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Loads the persisted cache. A missing file starts a fresh cache; any
    /// other read or decode failure is fatal, since the format carries no
    /// versioning and silently continuing would mask corruption.
    pub fn load(&mut self) -> Result<()> {
        info!("Loading cache file (use --no-cache to disable)");
        let path = Self::default_path()?;
        match self.load_from(&path) {
            Ok(()) => {
                info!("Loaded cache file");
                Ok(())
            }
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io| io.kind() == ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    warn!("Cache file does not exist, starting fresh");
                    Ok(())
                } else {
                    Err(e).with_context(|| format!("could not load cache from {}", path.display()))
                }
            }
        }
    }

    /// Persists the cache, creating its directory if needed. Failure is
    /// logged and swallowed: an unsaved cache only costs re-extraction on
    /// the next run.
    pub fn save(&self) {
        info!("Saving cache file (use --no-cache to disable)");
        let result = Self::default_path().and_then(|path| {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            self.save_to(&path)
        });
        match result {
            Ok(()) => info!("Saved cache file"),
            Err(e) => error!("Could not save cache: {:#}", e),
        }
    }

    fn load_from(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        let entries: HashMap<PathBuf, FileMeta> = bincode::deserialize_from(BufReader::new(file))?;
        self.entries = entries;
        Ok(())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), &self.entries)?;
        Ok(())
    }

    fn default_path() -> Result<PathBuf> {
        let base = dirs::cache_dir().context("no per-user cache directory on this platform")?;
        Ok(base.join("scenecat").join("cache.bin"))
    }
}

impl Default for MetaCache {
    fn default() -> Self {
        Self::new()
    }
}
