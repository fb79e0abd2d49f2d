//! 可达性变化到挂起/恢复决策的映射
//!
//! 连接性管理器不接触描述符, 只把可达性事件翻译成发往
//! 描述符管理器的 Suspend/Resume 消息。重复投递是安全的:
//! 管理器对重复的挂起/恢复是幂等的。

use actix::prelude::*;
use log::debug;

use crate::core::actor_manager::{Resume, Suspend};

/// 当前网络可达状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Unreachable,
    Wifi,
    Cellular,
}

/// 宿主观测到可达性变化
pub struct ReachabilityChanged(pub Reachability);

impl Message for ReachabilityChanged {
    type Result = ();
}

/// 切换蜂窝网络策略, 立即按新策略重算一次期望状态
pub struct SetAllowsCellularUsage(pub bool);

impl Message for SetAllowsCellularUsage {
    type Result = ();
}

pub struct ConnectivityManagerActor {
    allows_cellular_usage: bool,
    last_reachability: Reachability,
    suspend_recipient: Recipient<Suspend>,
    resume_recipient: Recipient<Resume>,
}

impl ConnectivityManagerActor {
    pub fn new(
        allows_cellular_usage: bool,
        suspend_recipient: Recipient<Suspend>,
        resume_recipient: Recipient<Resume>,
    ) -> Self {
        Self {
            allows_cellular_usage,
            last_reachability: Reachability::Wifi,
            suspend_recipient,
            resume_recipient,
        }
    }

    /// 决策表: 不可达→挂起; WiFi→恢复; 蜂窝→按策略
    fn apply(&self) {
        match self.last_reachability {
            Reachability::Unreachable => {
                debug!("网络不可达, 挂起上传");
                self.suspend_recipient.do_send(Suspend);
            }
            Reachability::Wifi => {
                debug!("WiFi 可达, 恢复上传");
                self.resume_recipient.do_send(Resume);
            }
            Reachability::Cellular => {
                if self.allows_cellular_usage {
                    debug!("蜂窝可达且策略允许, 恢复上传");
                    self.resume_recipient.do_send(Resume);
                } else {
                    debug!("蜂窝可达但策略禁止, 挂起上传");
                    self.suspend_recipient.do_send(Suspend);
                }
            }
        }
    }
}

impl Actor for ConnectivityManagerActor {
    type Context = Context<Self>;
}

impl Handler<ReachabilityChanged> for ConnectivityManagerActor {
    type Result = ();

    fn handle(&mut self, msg: ReachabilityChanged, _ctx: &mut Context<Self>) {
        self.last_reachability = msg.0;
        self.apply();
    }
}

impl Handler<SetAllowsCellularUsage> for ConnectivityManagerActor {
    type Result = ();

    fn handle(&mut self, msg: SetAllowsCellularUsage, _ctx: &mut Context<Self>) {
        if self.allows_cellular_usage == msg.0 {
            return;
        }
        self.allows_cellular_usage = msg.0;
        self.apply();
    }
}
