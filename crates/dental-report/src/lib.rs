//! # 牙科报告数据存储
//!
//! 管理单个会话中的牙科报告文档，包括：
//! - 报告加载：旧字段名规范化、同一患者重复加载保护
//! - 撤销/重做：线性快照历史
//! - 切片查询：按平面查询牙齿切片范围与标注切片
//! - 派生查询：数据状态、校验、问题统计
//! - 会话存储：每次状态变化后持久化当前快照

pub mod fetch;
pub mod history;
pub mod normalize;
pub mod queries;
pub mod slices;
pub mod storage;
pub mod store;

// 重新导出主要类型
pub use fetch::{detect_report_type, fetch_json_from_url, HttpReportFetcher, ReportFetcher};
pub use history::History;
pub use normalize::{normalize_report, LEGACY_FIELD_MAP, LEGACY_TOOTH_FIELD_MAP};
pub use queries::{DataStatus, ValidationReport};
pub use slices::{
    SliceHit, SliceRangeStatistics, ToothSliceRanges, ViewBoundaries, ViewRangeStats,
    ViewSliceRange,
};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, DEFAULT_STORAGE_KEY};
pub use store::{LoadStatus, ReportDataStore, StoreOptions};
