//! 描述符集合与挂起标志的落盘归档
//!
//! 每个管理器按名字独占一个归档目录, 描述符列表与挂起标志分开存放,
//! 挂起标志的写入频率远低于描述符列表。归档读写失败不会让管理器崩溃,
//! 最坏情况是退化为从空集合启动。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::descriptor::Descriptor;
use crate::core::error::UploadError;
use crate::session::TaskId;

const DESCRIPTORS_FILE: &str = "descriptors.json";
const SUSPENDED_FILE: &str = "suspended.json";
const ARCHIVE_VERSION: u32 = 1;

/// 描述符归档文件的版本化封皮
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveEnvelope {
    version: u32,
    saved_at: DateTime<Utc>,
    descriptors: Vec<Descriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SuspendedEnvelope {
    version: u32,
    suspended: bool,
}

/// 旧版归档的一次性迁移钩子
///
/// 返回旧版归档文件的位置; 迁移成功后旧文件会被删除, 新位置成为唯一权威。
pub trait ArchiveMigrating {
    fn legacy_archive_path(&self, name: &str) -> Option<PathBuf>;
}

/// 描述符归档器
///
/// 持有内存中的权威描述符集合, 每次结构性变更后整体重写归档文件。
/// 集合规模按设计是小的(几十个并发上传), 整体重写比增量日志简单得多。
pub struct DescriptorArchiver {
    dir: PathBuf,
    descriptors: HashMap<String, Descriptor>,
    suspended: bool,
}

impl DescriptorArchiver {
    /// 归档目录无法创建时返回错误, 不产生半初始化的实例
    pub fn new(base_dir: &Path, name: &str) -> Result<Self, UploadError> {
        Self::with_migrator(base_dir, name, None)
    }

    pub fn with_migrator(
        base_dir: &Path,
        name: &str,
        migrator: Option<&dyn ArchiveMigrating>,
    ) -> Result<Self, UploadError> {
        let dir = base_dir.join(name);
        fs::create_dir_all(&dir).map_err(|e| {
            UploadError::Archive(format!("无法创建归档目录 {}: {}", dir.display(), e))
        })?;

        let mut archiver = Self {
            dir,
            descriptors: HashMap::new(),
            suspended: false,
        };
        archiver.load(name, migrator);
        Ok(archiver)
    }

    fn load(&mut self, name: &str, migrator: Option<&dyn ArchiveMigrating>) {
        let path = self.dir.join(DESCRIPTORS_FILE);
        match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<ArchiveEnvelope>(&data) {
                Ok(envelope) if envelope.version == ARCHIVE_VERSION => {
                    self.descriptors = envelope
                        .descriptors
                        .into_iter()
                        .map(|d| (d.identifier.clone(), d))
                        .collect();
                }
                Ok(envelope) => {
                    warn!(
                        "忽略版本不匹配的归档: {} (期待 {})",
                        envelope.version, ARCHIVE_VERSION
                    );
                }
                Err(e) => {
                    warn!("归档解析失败, 从空集合启动: {}", e);
                }
            },
            Err(_) => {
                // 新位置没有归档, 尝试一次性迁移旧版文件
                if let Some(migrator) = migrator {
                    if let Some(legacy_path) = migrator.legacy_archive_path(name) {
                        self.migrate_legacy(&legacy_path);
                    }
                }
            }
        }

        self.suspended = match fs::read_to_string(self.dir.join(SUSPENDED_FILE)) {
            Ok(data) => serde_json::from_str::<SuspendedEnvelope>(&data)
                .map(|e| e.suspended)
                .unwrap_or(false),
            Err(_) => false,
        };
    }

    fn migrate_legacy(&mut self, legacy_path: &Path) {
        let parsed = fs::read_to_string(legacy_path)
            .map_err(|e| UploadError::Io(e.to_string()))
            .and_then(|data| {
                serde_json::from_str::<Vec<Descriptor>>(&data)
                    .map_err(|e| UploadError::Archive(e.to_string()))
            });
        match parsed {
            Ok(list) => {
                info!(
                    "从旧版归档迁移 {} 个描述符: {}",
                    list.len(),
                    legacy_path.display()
                );
                self.descriptors = list
                    .into_iter()
                    .map(|d| (d.identifier.clone(), d))
                    .collect();
                self.save_descriptors();
                let _ = fs::remove_file(legacy_path);
            }
            Err(e) => {
                warn!("旧版归档读取失败, 跳过迁移: {}", e);
            }
        }
    }

    /// 把当前集合整体写入磁盘
    pub fn save(&self) {
        self.save_descriptors();
    }

    fn save_descriptors(&self) {
        let envelope = ArchiveEnvelope {
            version: ARCHIVE_VERSION,
            saved_at: Utc::now(),
            descriptors: self.descriptors.values().cloned().collect(),
        };
        match serde_json::to_string_pretty(&envelope) {
            Ok(json) => {
                if let Err(e) = fs::write(self.dir.join(DESCRIPTORS_FILE), json) {
                    warn!("归档写入失败: {}", e);
                }
            }
            Err(e) => warn!("归档序列化失败: {}", e),
        }
    }

    fn save_suspended(&self) {
        let envelope = SuspendedEnvelope {
            version: ARCHIVE_VERSION,
            suspended: self.suspended,
        };
        match serde_json::to_string(&envelope) {
            Ok(json) => {
                if let Err(e) = fs::write(self.dir.join(SUSPENDED_FILE), json) {
                    warn!("挂起标志写入失败: {}", e);
                }
            }
            Err(e) => warn!("挂起标志序列化失败: {}", e),
        }
    }

    pub fn suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
        self.save_suspended();
    }

    /// 插入描述符并落盘, 标识重复时拒绝
    pub fn insert(&mut self, descriptor: Descriptor) -> Result<(), UploadError> {
        if self.descriptors.contains_key(&descriptor.identifier) {
            return Err(UploadError::DuplicateIdentifier(
                descriptor.identifier.clone(),
            ));
        }
        self.descriptors
            .insert(descriptor.identifier.clone(), descriptor);
        self.save_descriptors();
        Ok(())
    }

    /// 移除描述符并落盘
    pub fn remove(&mut self, identifier: &str) -> Option<Descriptor> {
        let removed = self.descriptors.remove(identifier);
        if removed.is_some() {
            self.save_descriptors();
        }
        removed
    }

    /// 清空集合并落盘
    pub fn remove_all(&mut self) {
        self.descriptors.clear();
        self.save_descriptors();
    }

    /// 取出全部描述符, 集合清空后立即落盘
    pub fn take_all(&mut self) -> Vec<Descriptor> {
        let all: Vec<Descriptor> = self.descriptors.drain().map(|(_, d)| d).collect();
        self.save_descriptors();
        all
    }

    pub fn get(&self, identifier: &str) -> Option<&Descriptor> {
        self.descriptors.get(identifier)
    }

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut Descriptor> {
        self.descriptors.get_mut(identifier)
    }

    /// 按绑定的会话任务查找
    pub fn find_by_task_mut(&mut self, task_id: TaskId) -> Option<&mut Descriptor> {
        self.descriptors
            .values_mut()
            .find(|d| d.current_task_identifier == Some(task_id))
    }

    /// 返回第一个通过谓词的描述符
    pub fn descriptor_passing<F>(&self, test: F) -> Option<&Descriptor>
    where
        F: Fn(&Descriptor) -> bool,
    {
        self.descriptors.values().find(|d| test(d))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.values()
    }

    pub fn descriptors_mut(&mut self) -> impl Iterator<Item = &mut Descriptor> {
        self.descriptors.values_mut()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
