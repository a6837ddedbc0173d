//! 报告数据规范化
//!
//! 上游生产者仍在使用旧字段名。所有旧名到规范名的映射集中在这里的两张表里，
//! 结构变化时只需修改此文件。

use dental_core::{DentalError, ReportDocument, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// 报告根级别的旧字段映射（点分路径）
pub const LEGACY_FIELD_MAP: &[(&str, &str)] = &[
    ("patientId", "patientInfo.patientId"),
    ("info", "patientInfo.info"),
    ("patientInfo.fullName", "patientInfo.info.fullName"),
    ("patientInfo.dateOfBirth", "patientInfo.info.dateOfBirth"),
    ("patientInfo.age", "patientInfo.info.age"),
    ("patientInfo.lastScanDate", "patientInfo.info.lastScanDate"),
    ("patientInfo.gender", "patientInfo.info.gender"),
    ("patientInfo.bloodType", "patientInfo.info.bloodType"),
    ("patientInfo.allergies", "patientInfo.info.allergies"),
    ("patientInfo.medicalHistory", "patientInfo.info.medicalHistory"),
    ("scan", "scanInfo"),
    ("problemDetective", "problemDetection"),
    ("JAw", "jaw"),
    ("jawData", "jaw"),
    ("report_type", "reportType"),
];

/// 单颗牙齿记录内的旧字段映射
pub const LEGACY_TOOTH_FIELD_MAP: &[(&str, &str)] = &[
    ("teeth_mask", "teethMask"),
    ("Endo", "endo"),
    ("Root", "root"),
    ("Crown", "crown"),
];

/// 报告文档的字段结构，用于只在类型化字段上清除 null
///
/// `Leaf` 字段的内容（掩码、检测记录等）按原样透传；未列出的键进入 `extra`，同样原样保留。
enum Shape {
    Leaf,
    Record(&'static [(&'static str, Shape)]),
    List(&'static Shape),
}

use Shape::{Leaf, List, Record};

const MASK_LAYER: Shape = Record(&[("mask", Leaf)]);
const SLICE_RANGE: Shape = Record(&[("start", Leaf), ("end", Leaf)]);

const TOOTH: Shape = Record(&[
    ("toothNumber", Leaf),
    ("category", Leaf),
    ("position", Record(&[("x", Leaf), ("y", Leaf)])),
    ("boundingBox", Leaf),
    ("teethMask", Leaf),
    ("slice", Leaf),
    (
        "sliceRanges",
        Record(&[("axial", SLICE_RANGE), ("sagittal", SLICE_RANGE), ("coronal", SLICE_RANGE)]),
    ),
    (
        "problems",
        List(&Record(&[("type", Leaf), ("mask", Leaf), ("images", Leaf)])),
    ),
    ("gumHealth", Leaf),
    ("lastCheckup", Leaf),
    ("endo", MASK_LAYER),
    ("root", MASK_LAYER),
    ("crown", MASK_LAYER),
    ("approved", Leaf),
    ("roots", Leaf),
    ("canals", Leaf),
    ("notes", List(&Record(&[("text", Leaf), ("date", Leaf)]))),
]);

const TREATMENT_PLAN: Shape = Record(&[
    ("planId", Leaf),
    ("procedures", List(&Record(&[("prescriptions", Leaf), ("materials", Leaf)]))),
    ("followUp", Record(&[("requiredTests", Leaf)])),
]);

const REPORT: Shape = Record(&[
    ("reportType", Leaf),
    (
        "patientInfo",
        Record(&[
            ("patientId", Leaf),
            (
                "info",
                Record(&[
                    ("fullName", Leaf),
                    ("dateOfBirth", Leaf),
                    ("age", Leaf),
                    ("lastScanDate", Leaf),
                    ("gender", Leaf),
                    ("bloodType", Leaf),
                    ("allergies", Leaf),
                    ("medicalHistory", Leaf),
                ]),
            ),
        ]),
    ),
    ("jaw", Record(&[("upperJaw", MASK_LAYER), ("lowerJaw", MASK_LAYER)])),
    ("teeth", List(&TOOTH)),
    (
        "statistics",
        Record(&[
            ("totalTeeth", Leaf),
            ("healthy", Leaf),
            ("treated", Leaf),
            ("pathology", Leaf),
            ("missing", Leaf),
            (
                "cariesDistribution",
                Record(&[("active", Leaf), ("arrested", Leaf), ("recurrent", Leaf)]),
            ),
            ("periodontalStatus", Leaf),
        ]),
    ),
    (
        "scanInfo",
        Record(&[
            ("device", Leaf),
            (
                "dimensions",
                Record(&[("width", Leaf), ("height", Leaf), ("resolution", Leaf), ("dpi", Leaf)]),
            ),
            ("scanDate", Leaf),
            ("scanType", Leaf),
            ("radiationDose", Leaf),
        ]),
    ),
    ("problemDetection", Leaf),
    ("treatmentPlan", List(&TREATMENT_PLAN)),
    ("conclusion", Leaf),
    ("conclusionUpdatedAt", Leaf),
    (
        "metadata",
        Record(&[
            ("generatedBy", Leaf),
            ("lastUpdated", Leaf),
            ("clinicInfo", Record(&[("name", Leaf), ("license", Leaf), ("address", Leaf)])),
        ]),
    ),
]);

/// 将上游原始数据规范化为报告文档
///
/// 患者ID缺失或为空时返回验证错误，不产生任何部分结果。
pub fn normalize_report(raw: &Value) -> Result<ReportDocument> {
    if !raw.is_object() {
        return Err(DentalError::Validation("missing patient data".to_string()));
    }

    let mut value = raw.clone();
    apply_field_map(&mut value, LEGACY_FIELD_MAP);

    if let Some(teeth) = value.get_mut("teeth").and_then(Value::as_array_mut) {
        for tooth in teeth.iter_mut() {
            apply_field_map(tooth, LEGACY_TOOTH_FIELD_MAP);
        }
    }

    coerce_patient_id(&mut value);
    strip_nulls(&mut value, &REPORT);

    let has_patient_id = value
        .pointer("/patientInfo/patientId")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_patient_id {
        return Err(DentalError::Validation("missing patient data".to_string()));
    }

    let mut document: ReportDocument = serde_json::from_value(value)
        .map_err(|e| DentalError::Validation(format!("malformed report payload: {}", e)))?;

    enforce_invariants(&mut document);
    Ok(document)
}

/// 将字段补丁浅合并到记录上；值为 null 的键恢复默认值
pub fn apply_patch<T>(target: &T, patch: &Map<String, Value>) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(target)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| DentalError::Internal("patch target is not an object".to_string()))?;

    for (key, field) in patch {
        if field.is_null() {
            object.remove(key);
        } else {
            object.insert(key.clone(), field.clone());
        }
    }

    serde_json::from_value(value).map_err(|e| DentalError::Validation(e.to_string()))
}

fn apply_field_map(value: &mut Value, table: &[(&str, &str)]) {
    for (legacy, canonical) in table {
        let Some(old) = take_path(value, legacy) else {
            continue;
        };

        if path_exists(value, canonical) {
            debug!("Dropping legacy field {} in favour of {}", legacy, canonical);
            continue;
        }

        debug!("Renaming legacy field {} -> {}", legacy, canonical);
        insert_path(value, canonical, old);
    }
}

fn take_path(value: &mut Value, path: &str) -> Option<Value> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop()?;

    let mut current = value;
    for part in parts {
        current = current.get_mut(part)?;
    }
    current.as_object_mut()?.remove(last)
}

fn path_exists(value: &Value, path: &str) -> bool {
    let mut current = value;
    for part in path.split('.') {
        match current.get(part) {
            Some(next) => current = next,
            None => return false,
        }
    }
    !current.is_null()
}

fn insert_path(value: &mut Value, path: &str, field: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut current = value;
    for part in parts {
        let Some(object) = current.as_object_mut() else {
            return;
        };
        let next = object
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if next.is_null() {
            *next = Value::Object(Map::new());
        }
        current = next;
    }

    if let Some(object) = current.as_object_mut() {
        object.insert(last.to_string(), field);
    }
}

fn coerce_patient_id(value: &mut Value) {
    if let Some(id) = value.pointer_mut("/patientInfo/patientId") {
        let text = match id {
            Value::Number(n) => n.to_string(),
            _ => return,
        };
        *id = Value::String(text);
    }
}

/// 删除类型化字段上的 null，使其回退为默认值
fn strip_nulls(value: &mut Value, shape: &Shape) {
    match (shape, value) {
        (Record(fields), Value::Object(map)) => {
            for (name, field_shape) in fields.iter() {
                if map.get(*name).is_some_and(Value::is_null) {
                    map.remove(*name);
                } else if let Some(field) = map.get_mut(*name) {
                    strip_nulls(field, field_shape);
                }
            }
        }
        (List(item), Value::Array(items)) => {
            for entry in items.iter_mut() {
                strip_nulls(entry, item);
            }
        }
        _ => {}
    }
}

/// 加载或恢复文档时的一致性约束：牙齿编号、治疗计划ID唯一，切片范围 start <= end
pub fn enforce_invariants(document: &mut ReportDocument) {
    let mut seen = HashSet::new();
    document.teeth.retain(|tooth| {
        if tooth.tooth_number == 0 || seen.insert(tooth.tooth_number) {
            true
        } else {
            warn!("Dropping duplicate tooth {}", tooth.tooth_number);
            false
        }
    });

    for tooth in &mut document.teeth {
        if let Some(ranges) = tooth.slice_ranges.as_mut() {
            for view in dental_core::View::ALL {
                if let Some(range) = ranges.get(view) {
                    if !range.is_valid() {
                        warn!(
                            "Dropping inverted {} slice range {}..{} on tooth {}",
                            view, range.start, range.end, tooth.tooth_number
                        );
                        ranges.set(view, None);
                    }
                }
            }
        }
    }

    let mut plan_ids = HashSet::new();
    document.treatment_plan.retain(|plan| {
        if plan.plan_id.is_empty() || plan_ids.insert(plan.plan_id.clone()) {
            true
        } else {
            warn!("Dropping duplicate treatment plan {}", plan.plan_id);
            false
        }
    });
}
