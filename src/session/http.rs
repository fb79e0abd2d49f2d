//! 基于 awc 的进程内传输会话
//!
//! 任务在当前 actix Arbiter 上执行, 回调以消息形式送回管理器,
//! 因此两者必须运行在同一个 System 中。登记与启动分离:
//! register_* 只在任务表里建条目, resume_task 才发起网络请求。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix::prelude::*;
use awc::error::SendRequestError;
use bytes::Bytes;
use log::{debug, warn};
use tokio::io::AsyncReadExt;

use super::{TaskId, TransferSession};
use crate::core::actor_manager::{
    DescriptorManagerActor, TaskDidComplete, TaskDidFinishDownloading, TaskProgress,
};
use crate::core::error::{ConnectionErrorKind, UploadError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// 登记的任务描述
#[derive(Clone)]
enum TaskSpec {
    Upload {
        source: PathBuf,
        upload_link: String,
    },
    Download {
        url: String,
    },
}

struct TaskEntry {
    spec: TaskSpec,
    cancelled: Arc<AtomicBool>,
    running: bool,
}

type TaskTable = Arc<Mutex<HashMap<TaskId, TaskEntry>>>;

pub struct AwcTransferSession {
    identifier: String,
    chunk_size: usize,
    manager: Mutex<Option<Addr<DescriptorManagerActor>>>,
    tasks: TaskTable,
}

impl AwcTransferSession {
    pub fn new(identifier: &str, chunk_size: usize) -> Self {
        Self {
            identifier: identifier.to_string(),
            chunk_size,
            manager: Mutex::new(None),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 绑定回调的接收方, 管理器启动后立即调用
    pub fn set_manager(&self, manager: Addr<DescriptorManagerActor>) {
        *self.manager.lock().unwrap() = Some(manager);
    }

    fn register(&self, spec: TaskSpec) -> TaskId {
        let task_id = TaskId::new();
        self.tasks.lock().unwrap().insert(
            task_id,
            TaskEntry {
                spec,
                cancelled: Arc::new(AtomicBool::new(false)),
                running: false,
            },
        );
        task_id
    }
}

impl TransferSession for AwcTransferSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn register_upload(&self, source: &Path, upload_link: &str) -> Result<TaskId, UploadError> {
        Ok(self.register(TaskSpec::Upload {
            source: source.to_path_buf(),
            upload_link: upload_link.to_string(),
        }))
    }

    fn register_download(&self, url: &str) -> Result<TaskId, UploadError> {
        Ok(self.register(TaskSpec::Download {
            url: url.to_string(),
        }))
    }

    fn resume_task(&self, task_id: TaskId) -> Result<(), UploadError> {
        let manager = self
            .manager
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| UploadError::Unknown("会话尚未绑定管理器".to_string()))?;

        let (spec, cancelled) = {
            let mut tasks = self.tasks.lock().unwrap();
            let entry = tasks
                .get_mut(&task_id)
                .ok_or_else(|| UploadError::TaskNotFound(task_id.to_string()))?;
            if entry.running {
                return Ok(());
            }
            entry.running = true;
            (entry.spec.clone(), entry.cancelled.clone())
        };

        let chunk_size = self.chunk_size;
        let tasks = self.tasks.clone();
        actix::spawn(async move {
            let result = match spec {
                TaskSpec::Upload {
                    source,
                    upload_link,
                } => {
                    perform_upload(
                        task_id,
                        &source,
                        &upload_link,
                        chunk_size,
                        cancelled.clone(),
                        manager.clone(),
                    )
                    .await
                }
                TaskSpec::Download { url } => {
                    perform_download(task_id, &url, cancelled.clone(), manager.clone()).await
                }
            };

            tasks.lock().unwrap().remove(&task_id);
            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    debug!("任务失败: {} - {}", task_id, e);
                    Some(e)
                }
            };
            manager.do_send(TaskDidComplete { task_id, error });
        });
        Ok(())
    }

    fn cancel_task(&self, task_id: TaskId) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(entry) = tasks.get(&task_id) {
            if entry.running {
                // 运行中的任务通过标志位中断, 完成回调随后送达
                entry.cancelled.store(true, Ordering::SeqCst);
            } else {
                tasks.remove(&task_id);
            }
        }
    }

    fn task_exists(&self, task_id: TaskId) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(&task_id)
            .map(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// 分块读取源文件并通过流式请求体上传, 每块上报一次进度
async fn perform_upload(
    task_id: TaskId,
    source: &Path,
    upload_link: &str,
    chunk_size: usize,
    cancelled: Arc<AtomicBool>,
    manager: Addr<DescriptorManagerActor>,
) -> Result<(), UploadError> {
    let total = tokio::fs::metadata(source)
        .await
        .map_err(|e| UploadError::Io(e.to_string()))?
        .len();
    let file = tokio::fs::File::open(source)
        .await
        .map_err(|e| UploadError::Io(e.to_string()))?;

    let stream_cancelled = cancelled.clone();
    let progress_manager = manager.clone();
    let body = futures::stream::unfold((file, 0u64), move |(mut file, sent)| {
        let cancelled = stream_cancelled.clone();
        let manager = progress_manager.clone();
        async move {
            if cancelled.load(Ordering::SeqCst) {
                let err = std::io::Error::new(std::io::ErrorKind::Interrupted, "任务被取消");
                return Some((Err(err), (file, sent)));
            }
            let mut buf = vec![0u8; chunk_size];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    let sent = sent + n as u64;
                    if total > 0 {
                        manager.do_send(TaskProgress {
                            task_id,
                            fraction: sent as f64 / total as f64,
                        });
                    }
                    Some((Ok(Bytes::from(buf)), (file, sent)))
                }
                Err(e) => Some((Err(e), (file, sent))),
            }
        }
    });

    let client = awc::Client::default();
    let result = client
        .put(upload_link)
        .timeout(REQUEST_TIMEOUT)
        .send_stream(Box::pin(body))
        .await;

    if cancelled.load(Ordering::SeqCst) {
        return Err(UploadError::Cancelled);
    }
    let response = result.map_err(map_send_error)?;
    if !response.status().is_success() {
        return Err(UploadError::Server(format!(
            "上传失败: HTTP {}",
            response.status()
        )));
    }
    Ok(())
}

/// 下载型任务: 响应体写入临时文件, 同步询问管理器最终存放位置
async fn perform_download(
    task_id: TaskId,
    url: &str,
    cancelled: Arc<AtomicBool>,
    manager: Addr<DescriptorManagerActor>,
) -> Result<(), UploadError> {
    let client = awc::Client::default();
    let result = client.get(url).timeout(REQUEST_TIMEOUT).send().await;

    if cancelled.load(Ordering::SeqCst) {
        return Err(UploadError::Cancelled);
    }
    let mut response = result.map_err(map_send_error)?;
    let status = response.status();
    let body = response
        .body()
        .await
        .map_err(|e| UploadError::ResponseInvalid(e.to_string()))?;
    if !status.is_success() {
        return Err(UploadError::Server(format!("HTTP {}", status)));
    }

    let tmp = std::env::temp_dir().join(format!("multiup-body-{}.json", task_id));
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| UploadError::Io(e.to_string()))?;

    match manager
        .send(TaskDidFinishDownloading {
            task_id,
            path: tmp.clone(),
        })
        .await
    {
        Ok(Some(destination)) => {
            if let Err(e) = tokio::fs::rename(&tmp, &destination).await {
                warn!("响应文件移动失败 {} -> {}: {}", tmp.display(), destination.display(), e);
            }
        }
        Ok(None) => {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        Err(e) => {
            warn!("管理器不可达, 丢弃响应文件: {}", e);
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }
    Ok(())
}

/// 把 awc 的请求错误映射到统一错误类型
///
/// 连接类错误会触发管理器的隐式重试, 因此这里的分类决定重试行为。
fn map_send_error(error: SendRequestError) -> UploadError {
    match error {
        SendRequestError::Timeout => UploadError::Connection {
            kind: ConnectionErrorKind::Timeout,
            message: "请求超时".to_string(),
        },
        SendRequestError::Connect(e) => UploadError::Connection {
            kind: ConnectionErrorKind::HostUnreachable,
            message: e.to_string(),
        },
        SendRequestError::Send(e) => UploadError::Connection {
            kind: ConnectionErrorKind::ConnectionLost,
            message: e.to_string(),
        },
        SendRequestError::Body(e) => UploadError::Connection {
            kind: ConnectionErrorKind::ConnectionLost,
            message: e.to_string(),
        },
        other => UploadError::Unknown(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_does_not_start() {
        let session = AwcTransferSession::new("bg", 64 * 1024);
        let task_id = session
            .register_upload(Path::new("/tmp/a.mp4"), "https://example.com/u")
            .expect("登记失败");
        assert!(session.task_exists(task_id));
    }

    #[test]
    fn test_cancel_before_start_removes_entry() {
        let session = AwcTransferSession::new("bg", 64 * 1024);
        let task_id = session
            .register_download("https://example.com/create")
            .expect("登记失败");
        session.cancel_task(task_id);
        assert!(!session.task_exists(task_id));
        // 重复取消无害
        session.cancel_task(task_id);
    }

    #[actix_rt::test]
    async fn test_resume_requires_manager() {
        let session = AwcTransferSession::new("bg", 64 * 1024);
        let task_id = session
            .register_download("https://example.com/create")
            .expect("登记失败");
        let err = session.resume_task(task_id).expect_err("未绑定管理器应当失败");
        assert!(matches!(err, UploadError::Unknown(_)));
    }

    #[test]
    fn test_unknown_task_queries() {
        let session = AwcTransferSession::new("bg", 64 * 1024);
        assert!(!session.task_exists(TaskId::new()));
        session.cancel_task(TaskId::new());
    }
}
