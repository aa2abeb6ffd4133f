//! 历史记录模块
//!
//! 探测结果、状态迁移和永久投递失败以带类型的记录写入可插拔的历史存储。
//! 核心流程只追加，不回读。

use crate::error::Result;
use crate::health::{AlertEvent, ProbeResult};
use crate::notification::PermanentFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// 历史记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    /// 一次探测结果
    ProbeResult(ProbeResult),
    /// 一次状态迁移
    Alert(AlertEvent),
    /// 一次永久投递失败
    PermanentFailure(PermanentFailure),
}

impl HistoryRecord {
    /// 记录关联的目标ID
    pub fn target_id(&self) -> &str {
        match self {
            HistoryRecord::ProbeResult(result) => &result.target_id,
            HistoryRecord::Alert(event) => &event.target_id,
            HistoryRecord::PermanentFailure(failure) => &failure.event.target_id,
        }
    }
}

/// 历史存储trait
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// 追加一条记录
    async fn append(&self, record: &HistoryRecord) -> Result<()>;
}

/// JSON Lines 文件历史存储，每行一条记录
pub struct JsonlHistory {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlHistory {
    /// 以追加模式打开（不存在时创建）历史文件
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!("历史文件已打开: {:?}", path);

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// 历史文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistorySink for JsonlHistory {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// 内存历史存储，用于测试和不配置历史文件的场景
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: StdMutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的全部条目
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}
