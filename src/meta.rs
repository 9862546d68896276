use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Metadata extracted from one input file. Fields stay `None` when the
/// source tool does not report them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub recorded_at: Option<NaiveDateTime>,
    pub duration_ms: Option<u64>,
    pub frame_count: Option<u64>,
}

impl FileMeta {
    pub fn is_empty(&self) -> bool {
        self.recorded_at.is_none() && self.duration_ms.is_none() && self.frame_count.is_none()
    }
}
