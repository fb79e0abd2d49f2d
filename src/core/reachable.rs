//! 描述符管理器与连接性管理器的组合封装
//!
//! 宿主通常只和这个类型打交道: 一次构造把两个 actor 接好线,
//! 并把常用消息包装成方法。需要更细粒度控制时可直接拿到 Addr。

use std::sync::Arc;

use actix::prelude::*;
use actix::MailboxError;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::core::actor_manager::{
    AddDescriptor, BackgroundEventsFinished, CanHandleBackgroundEvents, CancelDescriptor,
    DescriptorManagerActor, DescriptorPassing, GetStats, KillAllDescriptors, ManagerStats,
    RegisterBackgroundEventsHandler, Resume, RetryDescriptor, Subscribe, Suspend,
};
use crate::core::archive::ArchiveMigrating;
use crate::core::connectivity::{
    ConnectivityManagerActor, Reachability, ReachabilityChanged, SetAllowsCellularUsage,
};
use crate::core::descriptor::Descriptor;
use crate::core::error::UploadError;
use crate::core::events::DescriptorEvent;
use crate::session::TransferSession;

/// 随网络状态自动挂起/恢复的描述符管理器
pub struct ReachableDescriptorManager {
    manager: Addr<DescriptorManagerActor>,
    connectivity: Addr<ConnectivityManagerActor>,
}

impl ReachableDescriptorManager {
    /// 启动管理器与连接性管理器, 必须在 actix System 内调用
    pub fn start(
        name: &str,
        config: &Config,
        session: Arc<dyn TransferSession>,
        subscribers: Vec<Recipient<DescriptorEvent>>,
    ) -> Result<Self, UploadError> {
        Self::start_with_migrator(name, config, session, subscribers, None)
    }

    pub fn start_with_migrator(
        name: &str,
        config: &Config,
        session: Arc<dyn TransferSession>,
        subscribers: Vec<Recipient<DescriptorEvent>>,
        migrator: Option<&dyn ArchiveMigrating>,
    ) -> Result<Self, UploadError> {
        let manager =
            DescriptorManagerActor::with_migrator(name, config, session, subscribers, migrator)?
                .start();
        let connectivity = ConnectivityManagerActor::new(
            config.allows_cellular_usage,
            manager.clone().recipient(),
            manager.clone().recipient(),
        )
        .start();
        Ok(Self {
            manager,
            connectivity,
        })
    }

    pub fn manager(&self) -> &Addr<DescriptorManagerActor> {
        &self.manager
    }

    pub fn connectivity(&self) -> &Addr<ConnectivityManagerActor> {
        &self.connectivity
    }

    pub async fn add(&self, descriptor: Descriptor) -> Result<(), UploadError> {
        self.manager
            .send(AddDescriptor { descriptor })
            .await
            .map_err(mailbox_error)?
    }

    pub async fn cancel(&self, identifier: &str) -> Result<bool, UploadError> {
        self.manager
            .send(CancelDescriptor {
                identifier: identifier.to_string(),
            })
            .await
            .map_err(mailbox_error)
    }

    pub async fn retry(&self, identifier: &str) -> Result<(), UploadError> {
        self.manager
            .send(RetryDescriptor {
                identifier: identifier.to_string(),
            })
            .await
            .map_err(mailbox_error)?
    }

    pub async fn suspend(&self) -> Result<(), UploadError> {
        self.manager.send(Suspend).await.map_err(mailbox_error)
    }

    pub async fn resume(&self) -> Result<(), UploadError> {
        self.manager.send(Resume).await.map_err(mailbox_error)
    }

    /// 清空全部描述符, 应答返回即取消完毕
    pub async fn kill_all(&self) -> Result<(), UploadError> {
        self.manager
            .send(KillAllDescriptors)
            .await
            .map_err(mailbox_error)
    }

    pub async fn descriptor_passing<F>(&self, test: F) -> Result<Option<Descriptor>, UploadError>
    where
        F: Fn(&Descriptor) -> bool + Send + 'static,
    {
        self.manager
            .send(DescriptorPassing {
                test: Box::new(test),
            })
            .await
            .map_err(mailbox_error)
    }

    pub async fn stats(&self) -> Result<ManagerStats, UploadError> {
        self.manager.send(GetStats).await.map_err(mailbox_error)
    }

    pub fn subscribe(&self, recipient: Recipient<DescriptorEvent>) {
        self.manager.do_send(Subscribe { recipient });
    }

    /// 宿主观测到可达性变化时调用
    pub fn reachability_did_change(&self, reachability: Reachability) {
        self.connectivity.do_send(ReachabilityChanged(reachability));
    }

    pub fn set_allows_cellular_usage(&self, allowed: bool) {
        self.connectivity.do_send(SetAllowsCellularUsage(allowed));
    }

    pub async fn can_handle_background_events(
        &self,
        identifier: &str,
    ) -> Result<bool, UploadError> {
        self.manager
            .send(CanHandleBackgroundEvents {
                identifier: identifier.to_string(),
            })
            .await
            .map_err(mailbox_error)
    }

    /// 系统为后台会话事件唤醒进程时调用
    ///
    /// 标识匹配时返回接收端, 所有事件排空后恰好收到一次通知;
    /// 标识不属于本会话时返回 None。
    pub async fn handle_events_for_background_session(
        &self,
        identifier: &str,
    ) -> Result<Option<oneshot::Receiver<()>>, UploadError> {
        let (tx, rx) = oneshot::channel();
        let accepted = self
            .manager
            .send(RegisterBackgroundEventsHandler {
                identifier: identifier.to_string(),
                completion: tx,
            })
            .await
            .map_err(mailbox_error)?;
        Ok(if accepted { Some(rx) } else { None })
    }

    /// 会话报告全部后台事件已排空
    pub fn background_events_finished(&self) {
        self.manager.do_send(BackgroundEventsFinished);
    }
}

fn mailbox_error(e: MailboxError) -> UploadError {
    UploadError::Unknown(format!("管理器信箱错误: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::DescriptorState;
    use crate::session::mock::MockTransferSession;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    fn temp_base() -> PathBuf {
        std::env::temp_dir().join(format!("multiup-reach-{}", uuid::Uuid::new_v4()))
    }

    #[actix_rt::test]
    async fn test_reachability_drives_suspend_and_resume() {
        let base = temp_base();
        let mut config = Config::default();
        config.archive_dir = base.to_string_lossy().to_string();
        let session = Arc::new(MockTransferSession::new());
        let reachable =
            ReachableDescriptorManager::start("uploads", &config, session.clone(), vec![])
                .expect("启动失败");

        let source = std::env::temp_dir().join(format!("multiup-reach-src-{}", uuid::Uuid::new_v4()));
        fs::write(&source, b"bytes").expect("创建源文件失败");
        reachable
            .add(Descriptor::upload("u1", &source, "https://example.com/u"))
            .await
            .expect("添加应当成功");

        reachable.reachability_did_change(Reachability::Unreachable);
        // do_send 链路: 等一拍让消息穿过两个信箱
        tokio::time::sleep(Duration::from_millis(50)).await;
        let d = reachable
            .descriptor_passing(|d| d.identifier == "u1")
            .await
            .expect("查询失败")
            .expect("描述符应当在集合中");
        assert_eq!(d.state, DescriptorState::Suspended);

        reachable.reachability_did_change(Reachability::Wifi);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let d = reachable
            .descriptor_passing(|d| d.identifier == "u1")
            .await
            .expect("查询失败")
            .expect("描述符应当在集合中");
        assert_eq!(d.state, DescriptorState::Executing);

        let _ = fs::remove_file(&source);
        let _ = fs::remove_dir_all(&base);
    }

    #[actix_rt::test]
    async fn test_background_session_identifier_matching() {
        let base = temp_base();
        let mut config = Config::default();
        config.archive_dir = base.to_string_lossy().to_string();
        let session = Arc::new(MockTransferSession::with_identifier("bg_session"));
        let reachable = ReachableDescriptorManager::start("uploads", &config, session, vec![])
            .expect("启动失败");

        assert!(reachable
            .can_handle_background_events("bg_session")
            .await
            .expect("查询失败"));
        assert!(!reachable
            .can_handle_background_events("other_session")
            .await
            .expect("查询失败"));

        let rx = reachable
            .handle_events_for_background_session("bg_session")
            .await
            .expect("注册失败")
            .expect("标识匹配应当接受");
        reachable.background_events_finished();
        rx.await.expect("回调应当触发");

        assert!(reachable
            .handle_events_for_background_session("other_session")
            .await
            .expect("注册失败")
            .is_none());

        let _ = fs::remove_dir_all(&base);
    }
}
