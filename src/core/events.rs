//! 管理器对外广播的生命周期事件
//!
//! 事件通过 actix Recipient 投递, 订阅者可以在构造管理器时传入
//! (启动对账期间的事件也能收到), 也可以随后用 Subscribe 消息加入。

use actix::prelude::*;

use crate::core::error::UploadError;
use crate::session::TaskId;

/// 描述符生命周期事件
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorEvent {
    /// 启动对账完成, count 为存活的描述符数量
    DescriptorsLoaded { count: usize },
    /// 描述符已加入集合
    DescriptorAdded { identifier: String },
    /// 描述符成功完成并已从集合剔除
    DescriptorDidSucceed { identifier: String },
    /// 描述符失败并已从集合剔除, 携带终结错误
    DescriptorDidFail {
        identifier: String,
        error: UploadError,
    },
    /// 描述符被宿主取消
    DescriptorDidCancel { identifier: String },
    /// 底层会话失效, 集合已整体清空
    SessionDidBecomeInvalid { error: Option<UploadError> },
    /// 收到无主的任务回调(诊断信号, 通常意味着状态不一致)
    DescriptorForTaskNotFound { task_id: TaskId },
    /// 上传进度, fraction 取值 0.0 ~ 1.0
    DescriptorProgress { identifier: String, fraction: f64 },
}

impl Message for DescriptorEvent {
    type Result = ();
}
