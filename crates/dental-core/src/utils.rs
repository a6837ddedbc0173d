//! 通用工具函数

use chrono::{DateTime, Duration, Utc};

/// FDI编号转换为牙齿名称，例如 11 -> "Upper Right Central Incisor"
pub fn tooth_name(tooth_number: u32) -> Option<String> {
    let quadrant = match tooth_number / 10 {
        1 => "Upper Right",
        2 => "Upper Left",
        3 => "Lower Left",
        4 => "Lower Right",
        _ => return None,
    };

    let tooth = match tooth_number % 10 {
        1 => "Central Incisor",
        2 => "Lateral Incisor",
        3 => "Canine",
        4 => "First Premolar",
        5 => "Second Premolar",
        6 => "First Molar",
        7 => "Second Molar",
        8 => "Third Molar",
        _ => return None,
    };

    Some(format!("{} {}", quadrant, tooth))
}

/// 生成严格晚于 `previous` 的时间戳
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

/// 全景报告类型（包含 AI 后缀形式）
pub fn is_pano_type(report_type: &str) -> bool {
    report_type == "pano" || report_type == "pano ai"
}

/// CBCT 报告类型（包含 AI 后缀形式）
pub fn is_cbct_type(report_type: &str) -> bool {
    report_type == "cbct" || report_type == "cbct ai"
}
