use serde::{Deserialize, Serialize};

/// 描述符状态机
///
/// Ready --prepare/resume--> Executing --suspend--> Suspended --resume--> Executing
/// 任何状态都可以通过 cancel 或终结错误进入 Finished, Finished 不再流出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorState {
    /// 已创建, 尚未启动任何网络任务
    Ready,
    /// 当前任务正在执行
    Executing,
    /// 被挂起(网络不可达或宿主显式挂起)
    Suspended,
    /// 终态: 成功、失败或取消
    Finished,
}

impl DescriptorState {
    pub fn is_finished(&self) -> bool {
        matches!(self, DescriptorState::Finished)
    }
}

impl std::fmt::Display for DescriptorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DescriptorState::Ready => "Ready",
            DescriptorState::Executing => "Executing",
            DescriptorState::Suspended => "Suspended",
            DescriptorState::Finished => "Finished",
        };
        write!(f, "{}", s)
    }
}
