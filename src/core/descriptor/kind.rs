use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 多步视频上传流程中的当前步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStep {
    /// 调用接口创建上传工单, 响应中携带上传地址
    Create,
    /// 向上传地址推送文件内容
    Upload,
    /// 调用接口激活视频, 响应中携带最终的视频地址
    Activate,
}

impl UploadStep {
    /// 下一步, Activate 之后流程结束
    pub fn next(self) -> Option<UploadStep> {
        match self {
            UploadStep::Create => Some(UploadStep::Upload),
            UploadStep::Upload => Some(UploadStep::Activate),
            UploadStep::Activate => None,
        }
    }
}

/// create 步骤的响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponse {
    /// 文件内容的上传地址
    pub upload_link: String,
    /// 上传完成后用来激活的接口地址
    pub activate_uri: String,
}

/// activate 步骤的响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateResponse {
    /// 最终可访问的视频地址
    pub video_uri: String,
}

/// 描述符承载的具体工作种类
///
/// 封闭的变体集合: 新增种类时编译器会强制补全所有 match 分支。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// 单任务上传: 向已知地址推送一个本地文件
    Upload {
        source: PathBuf,
        upload_link: String,
    },
    /// 多步视频上传: create -> upload -> activate
    ///
    /// 中间产物(上传地址、激活地址、视频地址)随描述符一起持久化,
    /// 崩溃重启后从当前步骤继续。
    VideoUpload {
        source: PathBuf,
        create_uri: String,
        upload_link: Option<String>,
        activate_uri: Option<String>,
        video_uri: Option<String>,
        step: UploadStep,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert_eq!(UploadStep::Create.next(), Some(UploadStep::Upload));
        assert_eq!(UploadStep::Upload.next(), Some(UploadStep::Activate));
        assert_eq!(UploadStep::Activate.next(), None);
    }

    #[test]
    fn test_create_response_parsing() {
        let json = r#"{"upload_link":"https://upload.example.com/u/1","activate_uri":"/videos/1/activate"}"#;
        let resp: CreateResponse = serde_json::from_str(json).expect("解析失败");
        assert_eq!(resp.upload_link, "https://upload.example.com/u/1");
        assert_eq!(resp.activate_uri, "/videos/1/activate");
    }

    #[test]
    fn test_create_response_missing_field() {
        let json = r#"{"upload_link":"https://upload.example.com/u/1"}"#;
        assert!(serde_json::from_str::<CreateResponse>(json).is_err());
    }
}
