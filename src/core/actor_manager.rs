//! 描述符管理器 actor
//!
//! 管理器是整个系统的同步边界: 宿主调用与会话回调都以消息形式进入
//! 同一个信箱, 由单线程逐条处理, 核心状态不需要任何锁。
//! 每条消息处理完毕前都会把变更写入归档, 崩溃后可从归档恢复。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::config::Config;
use crate::core::archive::{ArchiveMigrating, DescriptorArchiver};
use crate::core::descriptor::{Descriptor, DescriptorState, RetryPolicy};
use crate::core::error::UploadError;
use crate::core::events::DescriptorEvent;
use crate::session::{TaskId, TransferSession};
use crate::utils::validator;

// ================== 宿主侧消息 ==================

/// 添加描述符: 插入集合、登记任务并(未挂起时)启动
pub struct AddDescriptor {
    pub descriptor: Descriptor,
}

impl Message for AddDescriptor {
    type Result = Result<(), UploadError>;
}

/// 取消描述符, 返回是否找到并取消
pub struct CancelDescriptor {
    pub identifier: String,
}

impl Message for CancelDescriptor {
    type Result = bool;
}

/// 挂起全部描述符, 挂起标志持久化
pub struct Suspend;

impl Message for Suspend {
    type Result = ();
}

/// 恢复全部描述符
pub struct Resume;

impl Message for Resume {
    type Result = ();
}

/// 清空集合并取消所有任务, 消息应答即完成回调
pub struct KillAllDescriptors;

impl Message for KillAllDescriptors {
    type Result = ();
}

/// 宿主显式重试一个失败的描述符
pub struct RetryDescriptor {
    pub identifier: String,
}

impl Message for RetryDescriptor {
    type Result = Result<(), UploadError>;
}

/// 返回第一个通过谓词的描述符快照
pub struct DescriptorPassing {
    pub test: Box<dyn Fn(&Descriptor) -> bool + Send>,
}

impl Message for DescriptorPassing {
    type Result = Option<Descriptor>;
}

/// 按标识取描述符快照
pub struct GetDescriptor {
    pub identifier: String,
}

impl Message for GetDescriptor {
    type Result = Option<Descriptor>;
}

/// 订阅生命周期事件
pub struct Subscribe {
    pub recipient: Recipient<DescriptorEvent>,
}

impl Message for Subscribe {
    type Result = ();
}

/// 集合统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerStats {
    pub total: usize,
    pub ready: usize,
    pub executing: usize,
    pub suspended: usize,
    pub finished: usize,
}

pub struct GetStats;

impl Message for GetStats {
    type Result = ManagerStats;
}

/// 系统因后台会话事件唤醒进程时注册完成回调
///
/// 标识匹配本会话时返回 true 并保留回调; 所有事件排空后回调被触发一次。
pub struct RegisterBackgroundEventsHandler {
    pub identifier: String,
    pub completion: oneshot::Sender<()>,
}

impl Message for RegisterBackgroundEventsHandler {
    type Result = bool;
}

/// 查询某个会话标识是否归本管理器处理
pub struct CanHandleBackgroundEvents {
    pub identifier: String,
}

impl Message for CanHandleBackgroundEvents {
    type Result = bool;
}

// ================== 会话侧消息 ==================

/// 会话的全部后台事件已经排空
pub struct BackgroundEventsFinished;

impl Message for BackgroundEventsFinished {
    type Result = ();
}

/// 底层会话失效, 集合整体重置
pub struct SessionDidBecomeInvalid {
    pub error: Option<UploadError>,
}

impl Message for SessionDidBecomeInvalid {
    type Result = ();
}

/// 下载型任务的响应体已落盘, 同步询问最终存放位置
///
/// None 表示临时文件不再需要, 由会话删除。
pub struct TaskDidFinishDownloading {
    pub task_id: TaskId,
    pub path: PathBuf,
}

impl Message for TaskDidFinishDownloading {
    type Result = Option<PathBuf>;
}

/// 任务完成(成功或失败)
pub struct TaskDidComplete {
    pub task_id: TaskId,
    pub error: Option<UploadError>,
}

impl Message for TaskDidComplete {
    type Result = ();
}

/// 任务进度
pub struct TaskProgress {
    pub task_id: TaskId,
    pub fraction: f64,
}

impl Message for TaskProgress {
    type Result = ();
}

// ================== 管理器 ==================

pub struct DescriptorManagerActor {
    name: String,
    session: Arc<dyn TransferSession>,
    archiver: DescriptorArchiver,
    retry_policy: RetryPolicy,
    subscribers: Vec<Recipient<DescriptorEvent>>,
    background_events_completion: Option<oneshot::Sender<()>>,
}

impl DescriptorManagerActor {
    /// 构造管理器并完成启动对账
    ///
    /// 订阅者在构造时传入, 对账期间剔除失败描述符的事件也能收到。
    pub fn new(
        name: &str,
        config: &Config,
        session: Arc<dyn TransferSession>,
        subscribers: Vec<Recipient<DescriptorEvent>>,
    ) -> Result<Self, UploadError> {
        Self::with_migrator(name, config, session, subscribers, None)
    }

    pub fn with_migrator(
        name: &str,
        config: &Config,
        session: Arc<dyn TransferSession>,
        subscribers: Vec<Recipient<DescriptorEvent>>,
        migrator: Option<&dyn ArchiveMigrating>,
    ) -> Result<Self, UploadError> {
        let archiver =
            DescriptorArchiver::with_migrator(Path::new(&config.archive_dir), name, migrator)?;
        let mut manager = Self {
            name: name.to_string(),
            session,
            archiver,
            retry_policy: config.retry_policy(),
            subscribers,
            background_events_completion: None,
        };
        manager.reconcile();
        manager.apply_suspended_state();
        Ok(manager)
    }

    /// 启动对账: 逐个重新绑定存活任务, 绑定失败的剔除并上报
    fn reconcile(&mut self) {
        let session = self.session.clone();
        let mut lost: Vec<String> = Vec::new();
        for d in self.archiver.descriptors_mut() {
            if d.did_load_from_cache(session.as_ref()).is_err() {
                lost.push(d.identifier.clone());
            }
        }
        for identifier in lost {
            if let Some(d) = self.archiver.remove(&identifier) {
                let error = d.error.clone().unwrap_or(UploadError::TaskLost);
                warn!("启动对账剔除描述符: {} - {}", d.identifier, error);
                self.emit(DescriptorEvent::DescriptorDidFail {
                    identifier: d.identifier,
                    error,
                });
            }
        }
        self.archiver.save();
        self.emit(DescriptorEvent::DescriptorsLoaded {
            count: self.archiver.len(),
        });
    }

    /// 上次退出时处于挂起状态, 重启后保持挂起
    fn apply_suspended_state(&mut self) {
        if !self.archiver.suspended() {
            return;
        }
        let session = self.session.clone();
        for d in self.archiver.descriptors_mut() {
            d.suspend(session.as_ref());
        }
        self.archiver.save();
    }

    fn emit(&self, event: DescriptorEvent) {
        for subscriber in &self.subscribers {
            subscriber.do_send(event.clone());
        }
    }

    /// 连接错误退避到期后的重试
    fn retry_connection(&mut self, identifier: &str) {
        let session = self.session.clone();
        let result = match self.archiver.get_mut(identifier) {
            Some(d) => {
                // 等待期间被取消、挂起或终结的, 放弃这次重试
                if d.is_cancelled
                    || d.state == DescriptorState::Suspended
                    || d.state.is_finished()
                {
                    return;
                }
                let r = d.prepare(session.as_ref());
                if r.is_ok() {
                    d.resume(session.as_ref());
                }
                r
            }
            None => return,
        };
        self.archiver.save();
        if let Err(error) = result {
            if let Some(d) = self.archiver.remove(identifier) {
                self.emit(DescriptorEvent::DescriptorDidFail {
                    identifier: d.identifier,
                    error,
                });
            }
        }
    }

    fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total: self.archiver.len(),
            ..Default::default()
        };
        for d in self.archiver.descriptors() {
            match d.state {
                DescriptorState::Ready => stats.ready += 1,
                DescriptorState::Executing => stats.executing += 1,
                DescriptorState::Suspended => stats.suspended += 1,
                DescriptorState::Finished => stats.finished += 1,
            }
        }
        stats
    }
}

impl Actor for DescriptorManagerActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        info!(
            "描述符管理器已启动: {} ({} 个描述符, 挂起: {})",
            self.name,
            self.archiver.len(),
            self.archiver.suspended()
        );
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        info!("描述符管理器已停止: {}", self.name);
    }
}

// ================== 宿主侧处理 ==================

impl Handler<AddDescriptor> for DescriptorManagerActor {
    type Result = Result<(), UploadError>;

    fn handle(&mut self, msg: AddDescriptor, _ctx: &mut Context<Self>) -> Self::Result {
        let identifier = msg.descriptor.identifier.clone();
        validator::validate_identifier(&identifier)?;

        self.archiver.insert(msg.descriptor)?;
        self.emit(DescriptorEvent::DescriptorAdded {
            identifier: identifier.clone(),
        });

        let session = self.session.clone();
        let prepare_result = match self.archiver.get_mut(&identifier) {
            Some(d) => d.prepare(session.as_ref()),
            None => return Err(UploadError::DescriptorNotFound(identifier)),
        };
        if let Err(error) = prepare_result {
            // 登记失败的描述符不留在集合里
            self.archiver.remove(&identifier);
            self.emit(DescriptorEvent::DescriptorDidFail {
                identifier,
                error: error.clone(),
            });
            return Err(error);
        }

        let suspended = self.archiver.suspended();
        if let Some(d) = self.archiver.get_mut(&identifier) {
            if suspended {
                d.state = DescriptorState::Suspended;
            } else {
                d.resume(session.as_ref());
            }
        }
        self.archiver.save();
        debug!("描述符已添加: {}", identifier);
        Ok(())
    }
}

impl Handler<CancelDescriptor> for DescriptorManagerActor {
    type Result = MessageResult<CancelDescriptor>;

    fn handle(&mut self, msg: CancelDescriptor, _ctx: &mut Context<Self>) -> Self::Result {
        match self.archiver.remove(&msg.identifier) {
            Some(mut d) => {
                d.cancel(self.session.as_ref());
                self.emit(DescriptorEvent::DescriptorDidCancel {
                    identifier: d.identifier.clone(),
                });
                info!("描述符已取消: {}", d.identifier);
                MessageResult(true)
            }
            None => {
                debug!("取消时未找到描述符: {}", msg.identifier);
                MessageResult(false)
            }
        }
    }
}

impl Handler<Suspend> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, _msg: Suspend, _ctx: &mut Context<Self>) {
        if self.archiver.suspended() {
            return;
        }
        self.archiver.set_suspended(true);
        let session = self.session.clone();
        for d in self.archiver.descriptors_mut() {
            d.suspend(session.as_ref());
        }
        self.archiver.save();
        info!("管理器已挂起: {}", self.name);
    }
}

impl Handler<Resume> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, _msg: Resume, _ctx: &mut Context<Self>) {
        if !self.archiver.suspended() {
            return;
        }
        self.archiver.set_suspended(false);
        let session = self.session.clone();
        let mut failed: Vec<(String, UploadError)> = Vec::new();
        for d in self.archiver.descriptors_mut() {
            if d.state.is_finished() {
                continue;
            }
            // 绑定任务已在挂起或退避窗口中取消/丢失的, 先补登记
            let needs_prepare = match d.current_task_identifier {
                Some(task_id) => !session.task_exists(task_id),
                None => true,
            };
            if needs_prepare {
                if let Err(e) = d.prepare(session.as_ref()) {
                    failed.push((d.identifier.clone(), e));
                    continue;
                }
            }
            d.resume(session.as_ref());
        }
        self.archiver.save();
        for (identifier, error) in failed {
            self.archiver.remove(&identifier);
            self.emit(DescriptorEvent::DescriptorDidFail { identifier, error });
        }
        info!("管理器已恢复: {}", self.name);
    }
}

impl Handler<KillAllDescriptors> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, _msg: KillAllDescriptors, _ctx: &mut Context<Self>) {
        // 先清空集合并落盘, 消息应答时观察者已看不到任何描述符
        let mut victims = self.archiver.take_all();
        let session = self.session.clone();
        for d in victims.iter_mut() {
            d.cancel(session.as_ref());
        }
        info!("已清空 {} 个描述符: {}", victims.len(), self.name);
    }
}

impl Handler<RetryDescriptor> for DescriptorManagerActor {
    type Result = Result<(), UploadError>;

    fn handle(&mut self, msg: RetryDescriptor, _ctx: &mut Context<Self>) -> Self::Result {
        let session = self.session.clone();
        let result = match self.archiver.get_mut(&msg.identifier) {
            Some(d) => d.retry(session.as_ref()),
            None => return Err(UploadError::DescriptorNotFound(msg.identifier)),
        };
        match result {
            Ok(()) => {
                self.archiver.save();
                Ok(())
            }
            Err(error) => {
                if let Some(d) = self.archiver.remove(&msg.identifier) {
                    self.emit(DescriptorEvent::DescriptorDidFail {
                        identifier: d.identifier,
                        error: error.clone(),
                    });
                }
                Err(error)
            }
        }
    }
}

impl Handler<DescriptorPassing> for DescriptorManagerActor {
    type Result = Option<Descriptor>;

    fn handle(&mut self, msg: DescriptorPassing, _ctx: &mut Context<Self>) -> Self::Result {
        self.archiver.descriptor_passing(|d| (msg.test)(d)).cloned()
    }
}

impl Handler<GetDescriptor> for DescriptorManagerActor {
    type Result = Option<Descriptor>;

    fn handle(&mut self, msg: GetDescriptor, _ctx: &mut Context<Self>) -> Self::Result {
        self.archiver.get(&msg.identifier).cloned()
    }
}

impl Handler<Subscribe> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _ctx: &mut Context<Self>) {
        self.subscribers.push(msg.recipient);
    }
}

impl Handler<GetStats> for DescriptorManagerActor {
    type Result = MessageResult<GetStats>;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(self.stats())
    }
}

impl Handler<RegisterBackgroundEventsHandler> for DescriptorManagerActor {
    type Result = MessageResult<RegisterBackgroundEventsHandler>;

    fn handle(
        &mut self,
        msg: RegisterBackgroundEventsHandler,
        _ctx: &mut Context<Self>,
    ) -> Self::Result {
        if msg.identifier != self.session.identifier() {
            return MessageResult(false);
        }
        if self.background_events_completion.is_some() {
            warn!("覆盖未触发的后台事件回调: {}", self.name);
        }
        self.background_events_completion = Some(msg.completion);
        MessageResult(true)
    }
}

impl Handler<CanHandleBackgroundEvents> for DescriptorManagerActor {
    type Result = MessageResult<CanHandleBackgroundEvents>;

    fn handle(
        &mut self,
        msg: CanHandleBackgroundEvents,
        _ctx: &mut Context<Self>,
    ) -> Self::Result {
        MessageResult(msg.identifier == self.session.identifier())
    }
}

// ================== 会话侧处理 ==================

impl Handler<BackgroundEventsFinished> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, _msg: BackgroundEventsFinished, _ctx: &mut Context<Self>) {
        // take 保证回调恰好触发一次, 重复通知是空操作
        if let Some(completion) = self.background_events_completion.take() {
            let _ = completion.send(());
            debug!("后台事件已排空: {}", self.name);
        }
    }
}

impl Handler<SessionDidBecomeInvalid> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, msg: SessionDidBecomeInvalid, _ctx: &mut Context<Self>) {
        warn!("会话已失效, 清空描述符集合: {}", self.name);
        self.archiver.remove_all();
        self.emit(DescriptorEvent::SessionDidBecomeInvalid { error: msg.error });
    }
}

impl Handler<TaskDidFinishDownloading> for DescriptorManagerActor {
    type Result = Option<PathBuf>;

    fn handle(
        &mut self,
        msg: TaskDidFinishDownloading,
        _ctx: &mut Context<Self>,
    ) -> Self::Result {
        let session = self.session.clone();
        let destination = match self.archiver.find_by_task_mut(msg.task_id) {
            Some(d) => d.task_did_finish_downloading(session.as_ref(), msg.task_id, &msg.path),
            None => {
                self.emit(DescriptorEvent::DescriptorForTaskNotFound {
                    task_id: msg.task_id,
                });
                return None;
            }
        };
        self.archiver.save();
        destination
    }
}

impl Handler<TaskDidComplete> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, msg: TaskDidComplete, ctx: &mut Context<Self>) {
        enum Followup {
            Suspended,
            Retry { identifier: String, delay: Duration },
            Forwarded {
                identifier: String,
                state: DescriptorState,
                error: Option<UploadError>,
            },
        }

        let session = self.session.clone();
        let policy = self.retry_policy.clone();

        let followup = {
            let d = match self.archiver.find_by_task_mut(msg.task_id) {
                Some(d) => d,
                None => {
                    self.emit(DescriptorEvent::DescriptorForTaskNotFound {
                        task_id: msg.task_id,
                    });
                    return;
                }
            };

            if d.is_cancelled {
                // 宿主取消已在 cancel 中同步收尾, 这里是会话补发的完成回调
                return;
            }

            if d.state == DescriptorState::Suspended {
                // 挂起引发的任务拆除不是失败: 重新登记任务, 等待恢复
                let _ = d.prepare(session.as_ref());
                if d.state.is_finished() {
                    Followup::Forwarded {
                        identifier: d.identifier.clone(),
                        state: d.state,
                        error: d.error.clone(),
                    }
                } else {
                    Followup::Suspended
                }
            } else if matches!(&msg.error, Some(e) if e.is_connection_error())
                && policy.should_retry(d.connection_retry_count)
            {
                d.connection_retry_count += 1;
                d.current_task_identifier = None;
                let delay = policy.delay_for(d.connection_retry_count);
                Followup::Retry {
                    identifier: d.identifier.clone(),
                    delay,
                }
            } else {
                d.task_did_complete(session.as_ref(), msg.error.clone());
                Followup::Forwarded {
                    identifier: d.identifier.clone(),
                    state: d.state,
                    error: d.error.clone(),
                }
            }
        };

        self.archiver.save();

        match followup {
            Followup::Suspended => {}
            Followup::Retry { identifier, delay } => {
                debug!("连接错误, {:?} 后重试: {}", delay, identifier);
                ctx.run_later(delay, move |act, _ctx| {
                    act.retry_connection(&identifier);
                });
            }
            Followup::Forwarded {
                identifier,
                state,
                error,
            } => {
                if !state.is_finished() {
                    // 多步流程推进到下一个任务, 继续留在集合中
                    return;
                }
                match error {
                    // 会话级取消而非宿主取消: 保留在集合中, 下次冷启动时上报
                    Some(e) if e.is_cancellation_error() => {
                        debug!("保留被会话取消的描述符: {}", identifier);
                    }
                    Some(e) => {
                        self.archiver.remove(&identifier);
                        self.emit(DescriptorEvent::DescriptorDidFail {
                            identifier,
                            error: e,
                        });
                    }
                    None => {
                        self.archiver.remove(&identifier);
                        self.emit(DescriptorEvent::DescriptorDidSucceed { identifier });
                    }
                }
            }
        }
    }
}

impl Handler<TaskProgress> for DescriptorManagerActor {
    type Result = ();

    fn handle(&mut self, msg: TaskProgress, _ctx: &mut Context<Self>) {
        let identifier = self
            .archiver
            .descriptors()
            .find(|d| d.current_task_identifier == Some(msg.task_id))
            .map(|d| d.identifier.clone());
        if let Some(identifier) = identifier {
            self.emit(DescriptorEvent::DescriptorProgress {
                identifier,
                fraction: msg.fraction.clamp(0.0, 1.0),
            });
        }
    }
}
