use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::descriptor::RetryPolicy;
use crate::core::error::UploadError;

/// 上传管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 归档根目录, 每个管理器在其下按名字建子目录
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    /// 后台会话标识, 用于匹配系统唤醒回调
    #[serde(default = "default_session_identifier")]
    pub background_session_identifier: String,
    /// 蜂窝网络下是否继续上传
    #[serde(default = "default_allows_cellular")]
    pub allows_cellular_usage: bool,
    /// 连接错误的最大隐式重试次数
    #[serde(default = "default_max_connection_retries")]
    pub max_connection_retries: u32,
    /// 重试基础延迟(秒)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,
    /// 重试延迟上限(秒)
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,
    /// 上传分块大小(字节), 同时是进度回调的粒度
    #[serde(default = "default_chunk_size")]
    pub upload_chunk_size: usize,
}

fn default_archive_dir() -> String {
    "./multiup".to_string()
}

fn default_session_identifier() -> String {
    "multiup_background_session".to_string()
}

fn default_allows_cellular() -> bool {
    true
}

fn default_max_connection_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1
}

fn default_retry_max_delay() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            background_session_identifier: default_session_identifier(),
            allows_cellular_usage: default_allows_cellular(),
            max_connection_retries: default_max_connection_retries(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            upload_chunk_size: default_chunk_size(),
        }
    }
}

impl Config {
    /// 从 TOML 文件加载配置
    ///
    /// 文件不存在或损坏时写出一份带注释的默认配置并返回默认值。
    pub fn load(path: &str) -> Result<Self, UploadError> {
        if !Path::new(path).exists() {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .map_err(|e| UploadError::Io(format!("读取配置文件失败 {}: {}", path, e)))?;
        match toml::from_str::<Config>(&content) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                warn!("配置文件格式错误: {}, 将使用默认配置", e);
                let config = Config::default();
                config.save_with_tutorial(path)?;
                Ok(config)
            }
        }
    }

    /// 保存带教程的配置文件(唯一写入方法)
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), UploadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .map_err(|e| UploadError::Io(format!("创建配置目录失败: {}", e)))?;
        }
        let body = toml::to_string_pretty(self)
            .map_err(|e| UploadError::Unknown(format!("无法序列化配置: {}", e)))?;
        let content = format!("{}\n\n{}", Self::generate_tutorial_content(), body);
        fs::write(path, content)
            .map_err(|e| UploadError::Io(format!("写入配置文件失败 {}: {}", path, e)))
    }

    /// 生成配置文件教程内容
    fn generate_tutorial_content() -> &'static str {
        "# multiup 配置文件\n\
         # ====================\n\
         #\n\
         # archive_dir: 归档根目录, 描述符集合与挂起标志保存在这里\n\
         # background_session_identifier: 后台会话标识, 用于匹配系统唤醒回调\n\
         # allows_cellular_usage: 蜂窝网络下是否继续上传\n\
         # max_connection_retries: 连接错误的最大隐式重试次数\n\
         # retry_base_delay_secs / retry_max_delay_secs: 重试退避区间(秒)\n\
         # upload_chunk_size: 上传分块大小(字节), 同时是进度回调的粒度"
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.archive_dir.trim().is_empty() {
            return Err(UploadError::Unknown("归档目录不能为空".to_string()));
        }
        if self.background_session_identifier.trim().is_empty() {
            return Err(UploadError::Unknown("会话标识不能为空".to_string()));
        }
        if self.upload_chunk_size == 0 {
            return Err(UploadError::Unknown("分块大小必须大于0".to_string()));
        }
        if self.retry_base_delay_secs > self.retry_max_delay_secs {
            return Err(UploadError::Unknown(
                "重试基础延迟不能大于延迟上限".to_string(),
            ));
        }
        Ok(())
    }

    /// 换算为重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_connection_retries: self.max_connection_retries,
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            ..Default::default()
        }
    }

    /// 一行摘要, 启动日志用
    pub fn summary(&self) -> String {
        format!(
            "归档目录: {} | 会话: {} | 蜂窝: {} | 连接重试: {} 次 | 分块: {} 字节",
            self.archive_dir,
            self.background_session_identifier,
            if self.allows_cellular_usage { "允许" } else { "禁止" },
            self.max_connection_retries,
            self.upload_chunk_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connection_retries, 3);
        assert!(config.allows_cellular_usage);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.upload_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.archive_dir = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry_base_delay_secs = 100;
        config.retry_max_delay_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let path = std::env::temp_dir()
            .join(format!("multiup-config-{}.toml", uuid::Uuid::new_v4()));
        let path_str = path.to_str().unwrap();

        let config = Config::load(path_str).expect("加载失败");
        assert!(path.exists(), "应当写出默认配置文件");
        assert_eq!(config.max_connection_retries, 3);

        let content = fs::read_to_string(&path).expect("读取失败");
        assert!(content.starts_with("# multiup 配置文件"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("multiup-config-{}.toml", uuid::Uuid::new_v4()));
        let path_str = path.to_str().unwrap();

        let mut config = Config::default();
        config.allows_cellular_usage = false;
        config.max_connection_retries = 7;
        config.save_with_tutorial(path_str).expect("保存失败");

        let loaded = Config::load(path_str).expect("加载失败");
        assert!(!loaded.allows_cellular_usage);
        assert_eq!(loaded.max_connection_retries, 7);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_rewritten_with_default() {
        let path = std::env::temp_dir()
            .join(format!("multiup-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "this is ][ not toml").expect("写入失败");

        let config = Config::load(path.to_str().unwrap()).expect("加载失败");
        assert_eq!(config.max_connection_retries, 3);
        // 损坏的文件被默认配置覆盖
        let content = fs::read_to_string(&path).expect("读取失败");
        assert!(content.starts_with("# multiup 配置文件"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_retry_policy_conversion() {
        let mut config = Config::default();
        config.max_connection_retries = 5;
        config.retry_base_delay_secs = 2;
        let policy = config.retry_policy();
        assert_eq!(policy.max_connection_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
    }
}
