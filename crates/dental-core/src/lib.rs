//! # Dental Core
//!
//! 牙科报告系统的核心模块，提供报告文档数据结构、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{DentalError, Result};
pub use models::*;
