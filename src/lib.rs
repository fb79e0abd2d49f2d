//! multiup - 可崩溃恢复的后台上传任务管理器
//!
//! 核心概念是"描述符"(Descriptor): 一个可持久化的上传工作单元,
//! 记录自身的状态机、当前绑定的网络任务和终结错误。
//! 管理器 actor 串行处理所有宿主调用与会话回调, 每次变更后落盘,
//! 进程重启时从归档恢复描述符集合并与会话中的存活任务对账。

pub mod config;
pub mod core;
pub mod session;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::actor_manager::DescriptorManagerActor;
pub use crate::core::connectivity::{ConnectivityManagerActor, Reachability};
pub use crate::core::descriptor::{Descriptor, DescriptorKind, DescriptorState, UploadStep};
pub use crate::core::error::UploadError;
pub use crate::core::events::DescriptorEvent;
pub use crate::core::reachable::ReachableDescriptorManager;
pub use crate::session::{TaskId, TransferSession};
