//! 配置管理
//!
//! 从可选的 TOML 文件加载外壳配置，并允许 `DENTAL_*` 环境变量覆盖，
//! 例如 `DENTAL_STORAGE__BACKEND=file`。

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::logging::LoggingConfig;

/// 外壳完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// 会话存储配置
    pub storage: StorageConfig,
    /// 历史配置
    pub history: HistoryConfig,
    /// 远程获取配置
    pub fetch: FetchConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

/// 会话存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 存储后端
    pub backend: StorageBackend,
    /// 会话根目录（文件后端）
    pub directory: Option<PathBuf>,
    /// 快照存储键
    pub key: String,
}

/// 撤销历史配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// 最大快照数，不设置表示不限制
    pub limit: Option<usize>,
}

/// 远程获取配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// User-Agent
    pub user_agent: String,
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: ShellConfig,
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&ShellConfig) -> Result<()>,
    /// 错误消息
    error_message: &'static str,
}

impl ConfigManager {
    /// 加载并验证配置
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    /// 从文件和环境变量加载配置
    fn load_config(config_path: Option<&Path>) -> Result<ShellConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("DENTAL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: ShellConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 更新配置
    pub fn update_config(&mut self, new_config: ShellConfig) -> Result<()> {
        self.validator.validate(&new_config)?;
        self.config = new_config;
        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(&self.config)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, config_str).context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// 按点分路径获取配置值，例如 `storage.backend`
    pub fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self
            .extract_nested_value(path)
            .context(format!("Configuration path not found: {}", path))?;

        serde_json::from_value(value).context("Failed to deserialize configuration value")
    }

    fn extract_nested_value(&self, path: &str) -> Result<serde_json::Value> {
        let config_json =
            serde_json::to_value(&self.config).context("Failed to serialize config to JSON")?;

        let mut current = &config_json;
        for part in path.split('.') {
            match current {
                serde_json::Value::Object(map) => {
                    current = map
                        .get(part)
                        .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?;
                }
                _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
            }
        }

        Ok(current.clone())
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "storage.key",
                validator: |config| {
                    if config.storage.key.trim().is_empty() {
                        Err(anyhow::anyhow!("Storage key cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid storage key",
            },
            ValidationRule {
                field_path: "storage.directory",
                validator: |config| {
                    if config.storage.backend == StorageBackend::File
                        && config.storage.directory.is_none()
                    {
                        Err(anyhow::anyhow!("File storage requires a directory"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid storage directory",
            },
            ValidationRule {
                field_path: "history.limit",
                validator: |config| {
                    if config.history.limit == Some(0) {
                        Err(anyhow::anyhow!("History limit must be at least 1"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid history limit",
            },
            ValidationRule {
                field_path: "fetch.timeout_secs",
                validator: |config| {
                    if config.fetch.timeout_secs == 0 {
                        Err(anyhow::anyhow!("Fetch timeout cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid fetch timeout",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ShellConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            directory: None,
            key: "dental-patient-data".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("dental-shell/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ShellConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.key, "dental-patient-data");
        assert_eq!(config.history.limit, None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_config(
            r#"
[storage]
backend = "file"
directory = "/tmp/dental-sessions"

[history]
limit = 50

[logging]
level = "debug"
json = true
"#,
        );

        let manager = ConfigManager::new(Some(file.path())).unwrap();
        let config = manager.config();
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.directory, Some(PathBuf::from("/tmp/dental-sessions")));
        assert_eq!(config.storage.key, "dental-patient-data");
        assert_eq!(config.history.limit, Some(50));
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let file = write_config("[storage]\nbackend = \"file\"\n");
        let err = ConfigManager::new(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Invalid storage directory"));

        let file = write_config("[history]\nlimit = 0\n");
        assert!(ConfigManager::new(Some(file.path())).is_err());
    }

    #[test]
    fn test_get_value_by_path() {
        let file = write_config("[fetch]\ntimeout_secs = 5\n");
        let manager = ConfigManager::new(Some(file.path())).unwrap();

        let timeout: u64 = manager.get_value("fetch.timeout_secs").unwrap();
        assert_eq!(timeout, 5);
        let backend: StorageBackend = manager.get_value("storage.backend").unwrap();
        assert_eq!(backend, StorageBackend::Memory);
        assert!(manager.get_value::<u64>("fetch.missing").is_err());
        assert!(manager.get_value::<u64>("fetch.timeout_secs.deeper").is_err());
    }

    #[test]
    fn test_update_and_save_round_trip() {
        let file = write_config("");
        let mut manager = ConfigManager::new(Some(file.path())).unwrap();

        let mut updated = manager.config().clone();
        updated.history.limit = Some(10);
        updated.logging.level = LogLevel::Warning;
        manager.update_config(updated.clone()).unwrap();

        let mut invalid = updated.clone();
        invalid.fetch.timeout_secs = 0;
        assert!(manager.update_config(invalid).is_err());
        assert_eq!(manager.config(), &updated);

        let out = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        manager.save(out.path()).unwrap();
        let reloaded = ConfigManager::new(Some(out.path())).unwrap();
        assert_eq!(reloaded.config(), &updated);
    }
}
