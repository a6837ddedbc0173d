//! 会话存储
//!
//! 当前文档快照在每次状态变化后写入会话存储，进程重启时恢复。
//! 撤销历史不会持久化。

use dental_core::{DentalError, ReportDocument, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// 默认存储键
pub const DEFAULT_STORAGE_KEY: &str = "dental-patient-data";

/// 持久化格式版本
pub const SNAPSHOT_VERSION: u32 = 1;

/// 持久化的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub version: u32,
    pub data: ReportDocument,
    #[serde(default)]
    pub current_report_id: Option<String>,
}

/// 会话存储接口
pub trait SessionStorage: Send + fmt::Debug {
    /// 读取键对应的值，不存在时返回 None
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// 写入键值
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// 删除键，键不存在时视为成功
    fn remove(&self, key: &str) -> Result<()>;
}

/// 进程内存储，克隆实例共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| DentalError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// 文件存储：会话目录下每个键一个 JSON 文件
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// 在 `base` 下创建新的会话目录
    pub fn new_session(base: impl AsRef<Path>) -> Result<(Uuid, Self)> {
        let session_id = Uuid::new_v4();
        let directory = base.as_ref().join(session_id.to_string());
        fs::create_dir_all(&directory)?;
        info!("Created session storage at {}", directory.display());
        Ok((session_id, Self::new(directory)))
    }

    /// 打开已有会话目录
    pub fn open_session(base: impl AsRef<Path>, session_id: Uuid) -> Self {
        Self::new(base.as_ref().join(session_id.to_string()))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", key))
    }
}

impl SessionStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.directory)?;

        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");

        let mut file = File::create(&temp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, &path).map_err(|e| {
            DentalError::Storage(format!(
                "failed to move {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        debug!("Saved session key {} to {}", key, path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 序列化快照
pub fn encode_snapshot(document: &ReportDocument, current_report_id: Option<&str>) -> Result<String> {
    let snapshot = PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        data: document.clone(),
        current_report_id: current_report_id.map(str::to_string),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// 反序列化快照并检查版本
pub fn decode_snapshot(payload: &str) -> Result<PersistedSnapshot> {
    let snapshot: PersistedSnapshot = serde_json::from_str(payload)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(DentalError::Storage(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.save("k", "v").unwrap();
        assert_eq!(other.load("k").unwrap().as_deref(), Some("v"));

        other.remove("k").unwrap();
        assert_eq!(storage.load("k").unwrap(), None);
        storage.remove("missing").unwrap();
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (session_id, storage) = FileStorage::new_session(dir.path()).unwrap();

        assert_eq!(storage.load("report").unwrap(), None);
        storage.save("report", "{\"a\":1}").unwrap();
        storage.save("report", "{\"a\":2}").unwrap();

        let reopened = FileStorage::open_session(dir.path(), session_id);
        assert_eq!(reopened.load("report").unwrap().as_deref(), Some("{\"a\":2}"));
        assert!(!reopened.directory().join("report.json.tmp").exists());

        reopened.remove("report").unwrap();
        reopened.remove("report").unwrap();
        assert_eq!(storage.load("report").unwrap(), None);
    }

    #[test]
    fn test_snapshot_encoding() {
        let mut doc = ReportDocument::default();
        doc.patient_info.patient_id = "P1".to_string();

        let payload = encode_snapshot(&doc, Some("R7")).unwrap();
        let decoded = decode_snapshot(&payload).unwrap();
        assert_eq!(decoded.data, doc);
        assert_eq!(decoded.current_report_id.as_deref(), Some("R7"));
    }

    #[test]
    fn test_snapshot_version_mismatch() {
        let payload = serde_json::json!({ "version": 99, "data": {} }).to_string();
        assert!(matches!(decode_snapshot(&payload), Err(DentalError::Storage(_))));
        assert!(decode_snapshot("not json").is_err());
    }
}
