//! 报告数据派生查询

use dental_core::ReportDocument;
use serde::Serialize;
use std::collections::BTreeMap;

/// 报告数据状态汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStatus {
    pub has_data: bool,
    pub has_patient_info: bool,
    pub has_teeth_data: bool,
    pub has_scan_data: bool,
    pub has_treatment_plans: bool,
    pub has_problems: bool,
    pub is_empty: bool,
    pub teeth_count: usize,
    pub problems_count: usize,
    pub treatment_plans_count: usize,
}

/// 数据校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub fn has_data(document: &ReportDocument) -> bool {
    document.is_present()
}

pub fn has_patient_info(document: &ReportDocument) -> bool {
    let patient = &document.patient_info;
    !patient.patient_id.is_empty()
        && !patient.info.full_name.is_empty()
        && !patient.info.date_of_birth.is_empty()
}

pub fn has_teeth_data(document: &ReportDocument) -> bool {
    !document.teeth.is_empty()
}

pub fn has_scan_data(document: &ReportDocument) -> bool {
    let scan = &document.scan_info;
    !scan.device.is_empty() || !scan.scan_date.is_empty() || !scan.scan_type.is_empty()
}

pub fn has_treatment_plans(document: &ReportDocument) -> bool {
    !document.treatment_plan.is_empty()
}

/// 是否有任意牙齿存在问题记录
pub fn has_problems(document: &ReportDocument) -> bool {
    document.teeth.iter().any(|tooth| !tooth.problems.is_empty())
}

pub fn data_status(document: &ReportDocument) -> DataStatus {
    let present = has_data(document);
    DataStatus {
        has_data: present,
        has_patient_info: has_patient_info(document),
        has_teeth_data: has_teeth_data(document),
        has_scan_data: has_scan_data(document),
        has_treatment_plans: has_treatment_plans(document),
        has_problems: has_problems(document),
        is_empty: !present,
        teeth_count: document.teeth.len(),
        problems_count: document.teeth.iter().map(|t| t.problems.len()).sum(),
        treatment_plans_count: document.treatment_plan.len(),
    }
}

/// 校验必填字段
pub fn validate(document: &ReportDocument) -> ValidationReport {
    let mut errors = Vec::new();
    let patient = &document.patient_info;

    if patient.patient_id.is_empty() {
        errors.push("patient id is required".to_string());
    }
    if patient.info.full_name.is_empty() {
        errors.push("patient full name is required".to_string());
    }
    if patient.info.date_of_birth.is_empty() {
        errors.push("date of birth is required".to_string());
    }

    for (index, tooth) in document.teeth.iter().enumerate() {
        if tooth.tooth_number == 0 {
            errors.push(format!("tooth number is missing for tooth #{}", index + 1));
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// 按问题类型统计所有牙齿上的问题数量
pub fn problem_statistics(document: &ReportDocument) -> BTreeMap<String, usize> {
    let mut stats = BTreeMap::new();
    for problem in document.teeth.iter().flat_map(|t| t.problems.iter()) {
        *stats.entry(problem.kind.clone()).or_insert(0) += 1;
    }
    stats
}
