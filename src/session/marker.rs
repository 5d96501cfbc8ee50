//! Local persistence of the active group, so a restart resumes the session.

use crate::types::GroupId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub trait ActiveGroupMarker: Send + Sync {
    fn load(&self) -> Result<Option<GroupId>, MarkerError>;
    fn save(&self, group: &GroupId) -> Result<(), MarkerError>;
    fn clear(&self) -> Result<(), MarkerError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedSession {
    #[serde(rename = "feastfit_currentGroupId")]
    current_group_id: GroupId,
    saved_at: String,
}

/// Marker kept in a small JSON file
pub struct FileMarker {
    path: PathBuf,
}

impl FileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ActiveGroupMarker for FileMarker {
    fn load(&self) -> Result<Option<GroupId>, MarkerError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let saved: SavedSession = serde_json::from_str(&raw)?;
        Ok(Some(saved.current_group_id))
    }

    fn save(&self, group: &GroupId) -> Result<(), MarkerError> {
        let saved = SavedSession {
            current_group_id: group.clone(),
            saved_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, serde_json::to_vec_pretty(&saved)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), MarkerError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Marker that only lives as long as the process
#[derive(Default)]
pub struct MemoryMarker {
    group: Mutex<Option<GroupId>>,
}

impl MemoryMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(group: GroupId) -> Self {
        Self {
            group: Mutex::new(Some(group)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<GroupId>> {
        // A poisoned marker still holds a usable value
        self.group.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ActiveGroupMarker for MemoryMarker {
    fn load(&self) -> Result<Option<GroupId>, MarkerError> {
        Ok(self.slot().clone())
    }

    fn save(&self, group: &GroupId) -> Result<(), MarkerError> {
        *self.slot() = Some(group.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), MarkerError> {
        *self.slot() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FileMarker::new(dir.path().join("session.json"));
        let group = GroupId::parse("FF-test1").unwrap();

        assert!(marker.load().unwrap().is_none());
        marker.save(&group).unwrap();
        assert_eq!(marker.load().unwrap(), Some(group));

        let raw = std::fs::read_to_string(dir.path().join("session.json")).unwrap();
        assert!(raw.contains("feastfit_currentGroupId"));

        marker.clear().unwrap();
        assert!(marker.load().unwrap().is_none());
        // Clearing twice is fine
        marker.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileMarker::new(path).load(),
            Err(MarkerError::Corrupt(_))
        ));
    }

    #[test]
    fn test_memory_marker() {
        let marker = MemoryMarker::new();
        let group = GroupId::parse("g").unwrap();
        marker.save(&group).unwrap();
        assert_eq!(marker.load().unwrap(), Some(group));
        marker.clear().unwrap();
        assert_eq!(marker.load().unwrap(), None);
    }
}
