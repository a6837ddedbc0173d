//! # 牙科报告外壳管理模块
//!
//! 提供配置管理和日志初始化

pub mod config;
pub mod logging;

pub use config::{ConfigManager, ConfigValidator, ShellConfig, StorageBackend};
pub use logging::{init_logging, LogLevel, LoggingConfig};
