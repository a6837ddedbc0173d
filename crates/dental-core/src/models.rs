//! 核心数据模型定义
//!
//! 报告文档的规范结构。所有字段都带默认值，缺失字段在反序列化时回退为
//! 空字符串、0 或空序列。几何掩码、图像和检测记录按原样透传。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DentalError;

/// 影像平面
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Axial,    // 轴位
    Sagittal, // 矢状位
    Coronal,  // 冠状位
}

impl View {
    pub const ALL: [View; 3] = [View::Axial, View::Sagittal, View::Coronal];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Axial => "axial",
            View::Sagittal => "sagittal",
            View::Coronal => "coronal",
        }
    }

    /// 解析平面名称（不区分大小写）
    pub fn parse(name: &str) -> Option<View> {
        match name.trim().to_ascii_lowercase().as_str() {
            "axial" => Some(View::Axial),
            "sagittal" => Some(View::Sagittal),
            "coronal" => Some(View::Coronal),
            _ => None,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = DentalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        View::parse(s).ok_or_else(|| {
            DentalError::Validation(format!(
                "Invalid view '{}'. Valid views: axial, sagittal, coronal",
                s
            ))
        })
    }
}

/// 切片范围，闭区间 `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: u32,
    pub end: u32,
}

impl SliceRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// 范围内的切片数量（u64，避免 `[0, u32::MAX]` 溢出）
    pub fn len(&self) -> u64 {
        u64::from(self.end.saturating_sub(self.start)) + 1
    }

    /// 切片在范围内的位置，从 1 开始；不在范围内时为 None
    pub fn relative_position(&self, slice: u32) -> Option<u64> {
        self.contains(slice)
            .then(|| u64::from(slice - self.start) + 1)
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, slice: u32) -> bool {
        slice >= self.start && slice <= self.end
    }
}

/// 每个平面的切片范围
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceRanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axial: Option<SliceRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sagittal: Option<SliceRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coronal: Option<SliceRange>,
}

impl SliceRanges {
    pub fn get(&self, view: View) -> Option<SliceRange> {
        match view {
            View::Axial => self.axial,
            View::Sagittal => self.sagittal,
            View::Coronal => self.coronal,
        }
    }

    pub fn set(&mut self, view: View, range: Option<SliceRange>) {
        match view {
            View::Axial => self.axial = range,
            View::Sagittal => self.sagittal = range,
            View::Coronal => self.coronal = range,
        }
    }

    /// 按平面顺序遍历已定义的范围
    pub fn iter(&self) -> impl Iterator<Item = (View, SliceRange)> + '_ {
        View::ALL
            .into_iter()
            .filter_map(move |view| self.get(view).map(|range| (view, range)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// 所有已定义范围均满足 start <= end
    pub fn all_valid(&self) -> bool {
        self.iter().all(|(_, range)| range.is_valid())
    }
}

/// 牙齿在全景图上的位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// 掩码层（颌骨、根管、牙根、牙冠）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskLayer {
    pub mask: Vec<Value>,
}

/// 检测到的牙齿问题
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub mask: Vec<Value>,
    pub images: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Problem {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }
}

/// 牙齿备注
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToothNote {
    pub text: String,
    pub date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToothNote {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// 单颗牙齿记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tooth {
    pub tooth_number: u32, // FDI编号，0 表示缺失
    pub category: String,
    pub position: Position,
    pub bounding_box: Vec<Value>,
    pub teeth_mask: Vec<Value>,
    pub slice: BTreeMap<String, Vec<u32>>, // 平面 -> 标注切片
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_ranges: Option<SliceRanges>,
    pub problems: Vec<Problem>,
    pub gum_health: String,
    pub last_checkup: String,
    pub endo: Option<MaskLayer>,
    pub root: Option<MaskLayer>,
    pub crown: Option<MaskLayer>,
    pub approved: bool,
    pub roots: u32,
    pub canals: u32,
    pub notes: Vec<ToothNote>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tooth {
    pub fn new(tooth_number: u32) -> Self {
        Self {
            tooth_number,
            ..Default::default()
        }
    }

    pub fn slice_range(&self, view: View) -> Option<SliceRange> {
        self.slice_ranges.as_ref().and_then(|ranges| ranges.get(view))
    }
}

/// 患者详细信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientDetails {
    pub full_name: String,
    pub date_of_birth: String,
    pub age: u32,
    pub last_scan_date: String,
    pub gender: String,
    pub blood_type: String,
    pub allergies: Vec<String>,
    pub medical_history: Vec<String>,
}

/// 患者信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientInfo {
    pub patient_id: String,
    pub info: PatientDetails,
}

/// 上下颌掩码
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Jaw {
    pub upper_jaw: MaskLayer,
    pub lower_jaw: MaskLayer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CariesDistribution {
    pub active: u32,
    pub arrested: u32,
    pub recurrent: u32,
}

/// 汇总统计（由上游生成，存储层不重新计算）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    pub total_teeth: u32,
    pub healthy: u32,
    pub treated: u32,
    pub pathology: u32,
    pub missing: u32,
    pub caries_distribution: CariesDistribution,
    pub periodontal_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDimensions {
    pub width: u32,
    pub height: u32,
    pub resolution: String,
    pub dpi: u32,
}

/// 扫描信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanInfo {
    pub device: String,
    pub dimensions: ScanDimensions,
    pub scan_date: String,
    pub scan_type: String,
    pub radiation_dose: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Procedure {
    pub prescriptions: Vec<Value>,
    pub materials: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FollowUp {
    pub required_tests: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 治疗计划
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreatmentPlan {
    pub plan_id: String,
    pub procedures: Vec<Procedure>,
    pub follow_up: FollowUp,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TreatmentPlan {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicInfo {
    pub name: String,
    pub license: String,
    pub address: String,
}

/// 报告元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub generated_by: String,
    pub last_updated: String,
    pub clinic_info: ClinicInfo,
}

/// 牙科报告文档
///
/// `Default` 即空模板：无患者、无牙齿、无治疗计划。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportDocument {
    pub report_type: String, // "pano" / "cbct" / 空
    pub patient_info: PatientInfo,
    pub jaw: Jaw,
    pub teeth: Vec<Tooth>,
    pub statistics: Statistics,
    pub scan_info: ScanInfo,
    pub problem_detection: Vec<Value>,
    pub treatment_plan: Vec<TreatmentPlan>,
    pub conclusion: String,
    pub conclusion_updated_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

impl ReportDocument {
    pub fn patient_id(&self) -> &str {
        &self.patient_info.patient_id
    }

    /// 文档是否已加载（患者ID非空）
    pub fn is_present(&self) -> bool {
        !self.patient_info.patient_id.trim().is_empty()
    }

    pub fn tooth(&self, tooth_number: u32) -> Option<&Tooth> {
        self.teeth.iter().find(|t| t.tooth_number == tooth_number)
    }

    pub fn tooth_mut(&mut self, tooth_number: u32) -> Option<&mut Tooth> {
        self.teeth.iter_mut().find(|t| t.tooth_number == tooth_number)
    }

    pub fn plan_mut(&mut self, plan_id: &str) -> Option<&mut TreatmentPlan> {
        self.treatment_plan.iter_mut().find(|p| p.plan_id == plan_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_view_parse_is_case_insensitive() {
        assert_eq!(View::parse("Axial"), Some(View::Axial));
        assert_eq!(View::parse(" CORONAL "), Some(View::Coronal));
        assert_eq!(View::parse("oblique"), None);
        assert!("frontal".parse::<View>().is_err());
    }

    #[test]
    fn test_slice_range_bounds() {
        let range = SliceRange::new(5, 10);
        assert_eq!(range.len(), 6);
        assert!(range.contains(5));
        assert!(range.contains(10));
        assert!(!range.contains(11));
        assert!(!SliceRange::new(8, 3).is_valid());
    }

    #[test]
    fn test_full_width_range_does_not_overflow() {
        let range = SliceRange::new(0, u32::MAX);
        assert_eq!(range.len(), u64::from(u32::MAX) + 1);
        assert_eq!(range.relative_position(u32::MAX), Some(u64::from(u32::MAX) + 1));
        assert_eq!(range.relative_position(0), Some(1));
        assert_eq!(SliceRange::new(5, 10).relative_position(4), None);
    }

    #[test]
    fn test_slice_ranges_validity() {
        let mut ranges = SliceRanges::default();
        assert!(ranges.all_valid());
        ranges.axial = Some(SliceRange::new(1, 4));
        assert!(ranges.all_valid());
        ranges.coronal = Some(SliceRange::new(9, 2));
        assert!(!ranges.all_valid());
    }

    #[test]
    fn test_empty_template_serializes_camel_case() {
        let value = serde_json::to_value(ReportDocument::default()).unwrap();
        assert_eq!(value["patientInfo"]["patientId"], json!(""));
        assert_eq!(value["scanInfo"]["dimensions"]["dpi"], json!(0));
        assert_eq!(value["conclusionUpdatedAt"], Value::Null);
        assert!(value["teeth"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_tooth_keeps_unknown_fields() {
        let tooth: Tooth = serde_json::from_value(json!({
            "toothNumber": 11,
            "comment": "watch",
            "sliceRanges": { "axial": { "start": 5, "end": 10 } },
            "problems": [{ "type": "caries", "severity": "high" }]
        }))
        .unwrap();

        assert_eq!(tooth.tooth_number, 11);
        assert_eq!(tooth.extra.get("comment"), Some(&json!("watch")));
        assert_eq!(tooth.slice_range(View::Axial), Some(SliceRange::new(5, 10)));
        assert_eq!(tooth.slice_range(View::Coronal), None);
        assert_eq!(tooth.problems[0].kind, "caries");
        assert_eq!(tooth.problems[0].extra.get("severity"), Some(&json!("high")));

        let back = serde_json::to_value(&tooth).unwrap();
        assert_eq!(back["comment"], json!("watch"));
        assert_eq!(back["problems"][0]["type"], json!("caries"));
    }

    #[test]
    fn test_is_present_trims_patient_id() {
        let mut doc = ReportDocument::default();
        assert!(!doc.is_present());
        doc.patient_info.patient_id = "   ".to_string();
        assert!(!doc.is_present());
        doc.patient_info.patient_id = "P1".to_string();
        assert!(doc.is_present());
    }
}
