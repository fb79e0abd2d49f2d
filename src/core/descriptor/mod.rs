//! 描述符: 可持久化的上传工作单元

pub mod kind;
pub mod retry;
pub mod state;

pub use kind::{ActivateResponse, CreateResponse, DescriptorKind, UploadStep};
pub use retry::RetryPolicy;
pub use state::DescriptorState;

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::error::UploadError;
use crate::session::{TaskId, TransferSession};
use crate::utils::validator;

/// 显式重试(宿主调用 retry)允许自动放行的最大次数
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// 一个上传工作单元
///
/// 描述符本身不做网络 IO, 只负责状态机与任务编排:
/// 向会话登记任务、解释完成回调、在多步流程中推进步骤。
/// 整个结构体可序列化, 每次变更后由管理器写入归档。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// 宿主指定的唯一标识
    pub identifier: String,
    pub state: DescriptorState,
    /// 当前绑定的会话任务, 重启对账时用来找回存活任务
    pub current_task_identifier: Option<TaskId>,
    /// 终结错误, 随描述符持久化
    pub error: Option<UploadError>,
    /// 宿主显式取消的标记, 用于区分挂起引发的任务取消
    pub is_cancelled: bool,
    /// 显式重试的累计次数
    pub retry_attempt_count: u32,
    /// 连接错误的隐式重试累计次数, 任务正常完成后清零
    pub connection_retry_count: u32,
    pub kind: DescriptorKind,
}

/// 标识即身份: 集合语义只看 identifier
impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl Descriptor {
    /// 单任务上传描述符
    pub fn upload(
        identifier: impl Into<String>,
        source: impl Into<PathBuf>,
        upload_link: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            identifier,
            DescriptorKind::Upload {
                source: source.into(),
                upload_link: upload_link.into(),
            },
        )
    }

    /// 多步视频上传描述符, 从 create 步骤开始
    pub fn video_upload(
        identifier: impl Into<String>,
        source: impl Into<PathBuf>,
        create_uri: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            identifier,
            DescriptorKind::VideoUpload {
                source: source.into(),
                create_uri: create_uri.into(),
                upload_link: None,
                activate_uri: None,
                video_uri: None,
                step: UploadStep::Create,
            },
        )
    }

    pub fn with_kind(identifier: impl Into<String>, kind: DescriptorKind) -> Self {
        Self {
            identifier: identifier.into(),
            state: DescriptorState::Ready,
            current_task_identifier: None,
            error: None,
            is_cancelled: false,
            retry_attempt_count: 0,
            connection_retry_count: 0,
            kind,
        }
    }

    /// 源文件路径
    pub fn source(&self) -> &Path {
        match &self.kind {
            DescriptorKind::Upload { source, .. } => source,
            DescriptorKind::VideoUpload { source, .. } => source,
        }
    }

    /// 为当前步骤登记网络任务
    ///
    /// 失败时描述符直接进入 Finished 并记录错误, 不会留下半登记的任务,
    /// 错误同时向外传播, 调用方据此决定是否从集合中剔除。
    pub fn prepare(&mut self, session: &dyn TransferSession) -> Result<(), UploadError> {
        match self.register_current_task(session) {
            Ok(task_id) => {
                self.current_task_identifier = Some(task_id);
                Ok(())
            }
            Err(e) => {
                self.current_task_identifier = None;
                self.error = Some(e.clone());
                self.state = DescriptorState::Finished;
                Err(e)
            }
        }
    }

    /// 启动或继续当前任务
    ///
    /// Finished 是终态, 不允许被集体恢复操作复活。
    pub fn resume(&mut self, session: &dyn TransferSession) {
        if self.state.is_finished() {
            return;
        }
        self.state = DescriptorState::Executing;
        if let Some(task_id) = self.current_task_identifier {
            if let Err(e) = session.resume_task(task_id) {
                warn!("恢复任务失败: {} - {}", self.identifier, e);
            }
        }
    }

    /// 挂起
    ///
    /// Ready 状态尚未启动任何任务, 只改状态即可。
    /// 其余情况必须取消绑定任务: 传输层无法在字节级暂停再续传,
    /// 恢复时会基于持久化的步骤信息重新发起。
    pub fn suspend(&mut self, session: &dyn TransferSession) {
        if self.state.is_finished() {
            return;
        }
        let original_state = self.state;
        self.state = DescriptorState::Suspended;
        if original_state == DescriptorState::Ready {
            return;
        }
        self.do_cancel(session);
    }

    /// 宿主显式取消, is_cancelled 置位后不可清除
    pub fn cancel(&mut self, session: &dyn TransferSession) {
        self.is_cancelled = true;
        self.state = DescriptorState::Finished;
        self.do_cancel(session);
    }

    /// 进程重启后重新绑定存活任务
    ///
    /// 绑定失败(任务已不在会话中)时进入 Finished 并返回错误;
    /// 已带终结错误的描述符保留原错误, 供管理器在重启后补发失败事件。
    pub fn did_load_from_cache(
        &mut self,
        session: &dyn TransferSession,
    ) -> Result<(), UploadError> {
        if self.state.is_finished() {
            let e = self.error.clone().unwrap_or(UploadError::TaskLost);
            return Err(e);
        }
        match self.current_task_identifier {
            Some(task_id) if session.task_exists(task_id) => Ok(()),
            _ => {
                let e = UploadError::TaskLost;
                self.error = Some(e.clone());
                self.current_task_identifier = None;
                self.state = DescriptorState::Finished;
                Err(e)
            }
        }
    }

    /// 下载型任务(create/activate 接口调用)的响应体落盘后的处理
    ///
    /// 解析响应并把中间产物写回描述符。返回 None 表示临时文件不再需要,
    /// 由会话负责删除; 解析失败时记录错误并终结, 等待完成回调统一收尾。
    pub fn task_did_finish_downloading(
        &mut self,
        _session: &dyn TransferSession,
        _task_id: TaskId,
        path: &Path,
    ) -> Option<PathBuf> {
        let parsed: Result<(), UploadError> = match &mut self.kind {
            DescriptorKind::Upload { .. } => Ok(()),
            DescriptorKind::VideoUpload {
                upload_link,
                activate_uri,
                video_uri,
                step,
                ..
            } => match *step {
                UploadStep::Create => match read_json_body::<CreateResponse>(path) {
                    Ok(resp) => {
                        *upload_link = Some(resp.upload_link);
                        *activate_uri = Some(resp.activate_uri);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                UploadStep::Upload => Ok(()),
                UploadStep::Activate => match read_json_body::<ActivateResponse>(path) {
                    Ok(resp) => {
                        *video_uri = Some(resp.video_uri);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            },
        };

        if let Err(e) = parsed {
            self.error = Some(e);
            self.current_task_identifier = None;
            self.state = DescriptorState::Finished;
        }

        None
    }

    /// 解释一次任务完成: 带错误则终结, 否则推进到下一步或收尾
    ///
    /// 已有的终结错误(例如响应解析失败)优先于回调携带的错误。
    pub fn task_did_complete(
        &mut self,
        session: &dyn TransferSession,
        error: Option<UploadError>,
    ) {
        self.current_task_identifier = None;

        if self.error.is_none() {
            if let Some(e) = error {
                self.error = Some(e);
            }
        }
        if self.error.is_some() {
            self.state = DescriptorState::Finished;
            return;
        }

        let next_step = match &self.kind {
            DescriptorKind::Upload { .. } => None,
            DescriptorKind::VideoUpload { step, .. } => step.next(),
        };

        match next_step {
            None => {
                self.connection_retry_count = 0;
                self.state = DescriptorState::Finished;
            }
            Some(step) => {
                if let DescriptorKind::VideoUpload { step: current, .. } = &mut self.kind {
                    *current = step;
                }
                self.connection_retry_count = 0;
                match self.prepare_next(session) {
                    Ok(task_id) => {
                        self.current_task_identifier = Some(task_id);
                        self.resume(session);
                    }
                    Err(e) => {
                        self.error = Some(e);
                        self.state = DescriptorState::Finished;
                    }
                }
            }
        }
    }

    /// 宿主显式重试: 清除错误, 回到 Ready 并重新登记任务
    pub fn retry(&mut self, session: &dyn TransferSession) -> Result<(), UploadError> {
        self.retry_attempt_count += 1;
        self.error = None;
        self.state = DescriptorState::Ready;
        self.prepare(session)?;
        self.resume(session);
        Ok(())
    }

    /// 基于 HTTP 状态码的自动重试判定
    ///
    /// 只有单任务上传在 5xx 且重试额度未用尽时放行。
    pub fn should_retry(&self, http_status: Option<u16>) -> bool {
        match &self.kind {
            DescriptorKind::Upload { .. } => {
                matches!(http_status, Some(code) if (500..600).contains(&code))
                    && self.retry_attempt_count < MAX_RETRY_ATTEMPTS
            }
            DescriptorKind::VideoUpload { .. } => false,
        }
    }

    fn prepare_next(&mut self, session: &dyn TransferSession) -> Result<TaskId, UploadError> {
        self.register_current_task(session)
    }

    fn register_current_task(
        &self,
        session: &dyn TransferSession,
    ) -> Result<TaskId, UploadError> {
        let source = self.source();
        if !source.exists() {
            return Err(UploadError::SourceMissing(source.display().to_string()));
        }

        match &self.kind {
            DescriptorKind::Upload {
                source, upload_link, ..
            } => {
                validator::validate_upload_link(upload_link)?;
                session.register_upload(source, upload_link)
            }
            DescriptorKind::VideoUpload {
                source,
                create_uri,
                upload_link,
                activate_uri,
                step,
                ..
            } => match step {
                UploadStep::Create => {
                    validator::validate_upload_link(create_uri)?;
                    session.register_download(create_uri)
                }
                UploadStep::Upload => {
                    let link = upload_link.clone().ok_or(UploadError::MissingUploadLink)?;
                    validator::validate_upload_link(&link)?;
                    session.register_upload(source, &link)
                }
                UploadStep::Activate => {
                    let uri = activate_uri.clone().ok_or_else(|| {
                        UploadError::ResponseInvalid("create 响应缺少激活地址".to_string())
                    })?;
                    session.register_download(&uri)
                }
            },
        }
    }

    fn do_cancel(&self, session: &dyn TransferSession) {
        if let Some(task_id) = self.current_task_identifier {
            session.cancel_task(task_id);
        }
    }
}

fn read_json_body<T: DeserializeOwned>(path: &Path) -> Result<T, UploadError> {
    let data =
        std::fs::read_to_string(path).map_err(|e| UploadError::Io(e.to_string()))?;
    serde_json::from_str(&data).map_err(|e| UploadError::ResponseInvalid(e.to_string()))
}
