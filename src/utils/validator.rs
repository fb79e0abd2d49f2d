use url::Url;

use crate::core::error::UploadError;

/// 上传地址必须是可解析的 http/https URL
pub fn is_valid_upload_link(link: &str) -> bool {
    match Url::parse(link) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

pub fn validate_upload_link(link: &str) -> Result<(), UploadError> {
    if is_valid_upload_link(link) {
        Ok(())
    } else {
        Err(UploadError::InvalidUploadLink(link.to_string()))
    }
}

/// 描述符标识不能为空白
pub fn validate_identifier(identifier: &str) -> Result<(), UploadError> {
    if identifier.trim().is_empty() {
        Err(UploadError::Unknown("描述符标识不能为空".to_string()))
    } else {
        Ok(())
    }
}
