//! 传输会话抽象
//!
//! 核心模块只依赖 [`TransferSession`] 接口, 不关心字节如何上网。
//! 生产环境使用基于 awc 的 [`http::AwcTransferSession`],
//! 测试使用记录型的 mock 实现。

pub mod http;
#[cfg(test)]
pub mod mock;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::UploadError;

/// 会话内任务的不透明标识
///
/// 随描述符一起持久化, 重启后用来在会话中找回存活任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 后台传输会话需要提供的能力
///
/// 注册与启动是分开的: register_* 只登记任务并返回标识,
/// 真正的网络活动由 resume_task 触发, 这样挂起状态下也能预先绑定任务。
pub trait TransferSession: Send + Sync {
    /// 会话标识, 用于判断系统唤醒回调是否属于本会话
    fn identifier(&self) -> &str;

    /// 登记一个文件上传任务(不启动)
    fn register_upload(&self, source: &Path, upload_link: &str) -> Result<TaskId, UploadError>;

    /// 登记一个下载型任务(create/activate 等接口调用, 响应体落盘为临时文件)
    fn register_download(&self, url: &str) -> Result<TaskId, UploadError>;

    /// 启动或继续任务
    fn resume_task(&self, task_id: TaskId) -> Result<(), UploadError>;

    /// 取消任务, 对已取消或不存在的任务是无害的空操作
    fn cancel_task(&self, task_id: TaskId);

    /// 任务是否仍然存活, 启动对账时使用
    fn task_exists(&self, task_id: TaskId) -> bool;
}
