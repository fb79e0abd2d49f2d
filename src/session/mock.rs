//! 测试用的记录型会话实现

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{TaskId, TransferSession};
use crate::core::error::UploadError;

/// 登记时的任务种类
#[derive(Debug, Clone, PartialEq)]
pub enum RegisteredKind {
    Upload {
        source: PathBuf,
        upload_link: String,
    },
    Download {
        url: String,
    },
}

/// 单个任务的记录
#[derive(Debug, Clone)]
pub struct RegisteredTask {
    pub kind: RegisteredKind,
    pub resumed: bool,
    pub cancelled: bool,
    pub alive: bool,
}

#[derive(Default)]
struct MockState {
    tasks: HashMap<TaskId, RegisteredTask>,
    register_error: Option<UploadError>,
    cancel_order: Vec<TaskId>,
    resume_count: usize,
}

/// 记录所有调用的假会话, 不产生任何网络活动
pub struct MockTransferSession {
    identifier: String,
    state: Mutex<MockState>,
}

impl MockTransferSession {
    pub fn new() -> Self {
        Self::with_identifier("mock_session")
    }

    pub fn with_identifier(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// 让下一次登记调用失败
    pub fn fail_next_register(&self, error: UploadError) {
        self.state.lock().unwrap().register_error = Some(error);
    }

    /// 预置一个存活任务, 模拟重启后会话中仍在运行的任务
    pub fn seed_task(&self, task_id: TaskId) {
        self.state.lock().unwrap().tasks.insert(
            task_id,
            RegisteredTask {
                kind: RegisteredKind::Download {
                    url: "seeded".to_string(),
                },
                resumed: false,
                cancelled: false,
                alive: true,
            },
        );
    }

    /// 把任务标记为不存活, 模拟进程外丢失
    pub fn kill_task(&self, task_id: TaskId) {
        if let Some(task) = self.state.lock().unwrap().tasks.get_mut(&task_id) {
            task.alive = false;
        }
    }

    pub fn task(&self, task_id: TaskId) -> Option<RegisteredTask> {
        self.state.lock().unwrap().tasks.get(&task_id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    /// 被取消的任务, 按取消先后排列
    pub fn cancelled_tasks(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().cancel_order.clone()
    }

    /// resume_task 被成功调用的总次数
    pub fn resumed_count(&self) -> usize {
        self.state.lock().unwrap().resume_count
    }
}

impl Default for MockTransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferSession for MockTransferSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn register_upload(&self, source: &Path, upload_link: &str) -> Result<TaskId, UploadError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.register_error.take() {
            return Err(error);
        }
        let task_id = TaskId::new();
        state.tasks.insert(
            task_id,
            RegisteredTask {
                kind: RegisteredKind::Upload {
                    source: source.to_path_buf(),
                    upload_link: upload_link.to_string(),
                },
                resumed: false,
                cancelled: false,
                alive: true,
            },
        );
        Ok(task_id)
    }

    fn register_download(&self, url: &str) -> Result<TaskId, UploadError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.register_error.take() {
            return Err(error);
        }
        let task_id = TaskId::new();
        state.tasks.insert(
            task_id,
            RegisteredTask {
                kind: RegisteredKind::Download {
                    url: url.to_string(),
                },
                resumed: false,
                cancelled: false,
                alive: true,
            },
        );
        Ok(task_id)
    }

    fn resume_task(&self, task_id: TaskId) -> Result<(), UploadError> {
        let mut state = self.state.lock().unwrap();
        // 已取消或丢失的任务不可恢复, 与真实会话一致
        match state.tasks.get_mut(&task_id) {
            Some(task) if task.alive && !task.cancelled => task.resumed = true,
            _ => return Err(UploadError::TaskNotFound(task_id.to_string())),
        }
        state.resume_count += 1;
        Ok(())
    }

    fn cancel_task(&self, task_id: TaskId) {
        let mut state = self.state.lock().unwrap();
        let mut found = false;
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.cancelled = true;
            task.alive = false;
            found = true;
        }
        if found {
            state.cancel_order.push(task_id);
        }
    }

    fn task_exists(&self, task_id: TaskId) -> bool {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(&task_id)
            .map(|t| t.alive && !t.cancelled)
            .unwrap_or(false)
    }
}
