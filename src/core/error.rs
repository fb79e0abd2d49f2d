use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 连接类错误的具体种类, 用于决定是否触发隐式重试
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionErrorKind {
    /// 请求超时
    Timeout,
    /// 无法连接到主机
    HostUnreachable,
    /// 域名解析失败
    DnsFailed,
    /// 连接中途断开
    ConnectionLost,
    /// 当前没有网络连接
    NotConnected,
}

/// 上传系统统一错误类型
///
/// 所有变体只携带自有数据, 终结错误会随描述符一起写入归档,
/// 进程重启后仍能向观察者完整上报。
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadError {
    #[error("源文件不存在: {0}")]
    SourceMissing(String),

    #[error("无效的上传地址: {0}")]
    InvalidUploadLink(String),

    #[error("缺少上传地址, create 步骤尚未完成")]
    MissingUploadLink,

    #[error("重复的描述符标识: {0}")]
    DuplicateIdentifier(String),

    #[error("未找到描述符: {0}")]
    DescriptorNotFound(String),

    #[error("连接错误({kind:?}): {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    #[error("任务被取消")]
    Cancelled,

    #[error("服务器错误: {0}")]
    Server(String),

    #[error("IO错误: {0}")]
    Io(String),

    #[error("归档错误: {0}")]
    Archive(String),

    #[error("响应内容无效: {0}")]
    ResponseInvalid(String),

    #[error("任务不存在: {0}")]
    TaskNotFound(String),

    #[error("描述符从归档恢复后没有存活的关联任务")]
    TaskLost,

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl UploadError {
    /// 是否属于连接类错误(可触发隐式重试)
    pub fn is_connection_error(&self) -> bool {
        matches!(self, UploadError::Connection { .. })
    }

    /// 是否属于取消类错误
    pub fn is_cancellation_error(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// 是否值得显式重试(连接类或服务端错误)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Connection { .. } | UploadError::Server(_)
        )
    }

    /// 是否属于不可恢复的本地错误, 重试也无济于事
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UploadError::SourceMissing(_)
                | UploadError::InvalidUploadLink(_)
                | UploadError::MissingUploadLink
        )
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e.to_string())
    }
}
