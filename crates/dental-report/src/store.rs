//! 报告数据存储
//!
//! `ReportDataStore` 是由应用外壳持有的会话上下文：每个活动会话一个实例，
//! 通过 [`ReportDataStore::open`] 创建，通过 [`ReportDataStore::end_session`] 结束。
//!
//! 绝大多数修改操作都会把修改后的文档副本写入历史，以支持撤销/重做。
//! 例外：牙齿审核状态、牙齿备注、患者信息和报告类型的修改不进入历史。
//! 找不到目标牙齿或治疗计划时，修改操作静默跳过。

use chrono::Utc;
use dental_core::utils::{is_cbct_type, is_pano_type, next_timestamp};
use dental_core::{
    DentalError, Problem, ReportDocument, Result, Tooth, ToothNote, TreatmentPlan, View,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::fetch::{fetch_json_from_url, ReportFetcher};
use crate::history::History;
use crate::normalize::{apply_patch, enforce_invariants, normalize_report};
use crate::queries::{self, DataStatus, ValidationReport};
use crate::slices::{
    self, SliceHit, SliceRangeStatistics, ToothSliceRanges, ViewBoundaries,
};
use crate::storage::{
    decode_snapshot, encode_snapshot, MemoryStorage, SessionStorage, DEFAULT_STORAGE_KEY,
};

/// 存储选项
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 会话存储键
    pub storage_key: String,
    /// 历史快照上限，None 表示不限制
    pub history_limit: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            history_limit: None,
        }
    }
}

/// 加载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// 文档已替换
    Loaded,
    /// 同一患者的文档已加载，未做任何修改
    Skipped,
}

/// 报告数据存储
#[derive(Debug)]
pub struct ReportDataStore {
    document: ReportDocument,
    history: History<ReportDocument>,
    current_report_id: Option<String>,
    loading: bool,
    error: Option<String>,
    storage: Box<dyn SessionStorage>,
    options: StoreOptions,
}

impl ReportDataStore {
    /// 创建存储并从会话存储恢复上次的文档快照
    pub fn open(storage: Box<dyn SessionStorage>, options: StoreOptions) -> Self {
        let mut store = Self {
            document: ReportDocument::default(),
            history: History::new(options.history_limit),
            current_report_id: None,
            loading: false,
            error: None,
            storage,
            options,
        };
        store.rehydrate();
        store
    }

    /// 使用进程内存储创建
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryStorage::new()), StoreOptions::default())
    }

    /// 结束会话并清除持久化快照
    pub fn end_session(self) -> Result<()> {
        self.storage.remove(&self.options.storage_key)?;
        info!("Report session ended, snapshot {} removed", self.options.storage_key);
        Ok(())
    }

    fn rehydrate(&mut self) {
        let payload = match self.storage.load(&self.options.storage_key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read persisted report snapshot: {}", e);
                return;
            }
        };

        match decode_snapshot(&payload) {
            Ok(mut snapshot) => {
                info!(
                    "Rehydrated report snapshot for patient '{}'",
                    snapshot.data.patient_id()
                );
                enforce_invariants(&mut snapshot.data);
                self.document = snapshot.data;
                self.current_report_id = snapshot.current_report_id;
            }
            Err(e) => warn!("Ignoring unreadable report snapshot: {}", e),
        }
    }

    fn persist(&self) {
        let payload = match encode_snapshot(&self.document, self.current_report_id.as_deref()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode report snapshot: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.save(&self.options.storage_key, &payload) {
            warn!("Failed to persist report snapshot: {}", e);
        }
    }

    /// 写入历史并持久化
    fn commit(&mut self) {
        self.history.record(self.document.clone());
        self.persist();
    }

    // ---- 状态访问 ----

    pub fn document(&self) -> &ReportDocument {
        &self.document
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> &History<ReportDocument> {
        &self.history
    }

    pub fn current_index(&self) -> Option<usize> {
        self.history.cursor()
    }

    pub fn current_report_id(&self) -> Option<&str> {
        self.current_report_id.as_deref()
    }

    pub fn set_current_report_id(&mut self, report_id: Option<String>) {
        self.current_report_id = report_id;
        self.persist();
    }

    // ---- 加载与重置 ----

    /// 加载上游报告数据
    ///
    /// 患者ID缺失时返回验证错误并记录到 `error`，文档保持不变。
    /// 若当前已加载同一患者的文档，返回 [`LoadStatus::Skipped`]，避免覆盖未保存的编辑。
    pub fn load_patient_data(&mut self, raw: &Value) -> Result<LoadStatus> {
        self.loading = true;

        let document = match normalize_report(raw) {
            Ok(document) => document,
            Err(e) => {
                let message = match &e {
                    DentalError::Validation(m) => m.clone(),
                    other => other.to_string(),
                };
                warn!("Rejected report payload: {}", message);
                self.error = Some(message);
                self.loading = false;
                return Err(e);
            }
        };

        if self.document.is_present() && self.document.patient_id() == document.patient_id() {
            debug!(
                "Report for patient '{}' already loaded, skipping",
                document.patient_id()
            );
            self.loading = false;
            return Ok(LoadStatus::Skipped);
        }

        info!(
            "Loaded report for patient '{}' with {} teeth",
            document.patient_id(),
            document.teeth.len()
        );
        self.document = document;
        self.history.reset_to(self.document.clone());
        self.error = None;
        self.loading = false;
        self.persist();
        Ok(LoadStatus::Loaded)
    }

    /// 从 URL 获取并加载报告；获取失败时返回 None，状态保持不变
    pub async fn load_from_url<F>(&mut self, fetcher: &F, url: &str) -> Option<Result<LoadStatus>>
    where
        F: ReportFetcher + ?Sized,
    {
        let was_loading = self.loading;
        self.loading = true;

        match fetch_json_from_url(fetcher, url).await {
            Some(raw) => Some(self.load_patient_data(&raw)),
            None => {
                self.loading = was_loading;
                None
            }
        }
    }

    /// 恢复空模板并清空历史
    pub fn reset_data(&mut self) {
        self.document = ReportDocument::default();
        self.history.clear();
        self.error = None;
        self.persist();
        info!("Report data reset");
    }

    // ---- 患者与牙齿 ----

    /// 浅合并患者详细信息（不进入历史）
    pub fn update_patient_info(&mut self, fields: &Map<String, Value>) {
        match apply_patch(&self.document.patient_info.info, fields) {
            Ok(info) => {
                self.document.patient_info.info = info;
                self.persist();
            }
            Err(e) => warn!("Ignoring invalid patient info update: {}", e),
        }
    }

    pub fn tooth(&self, tooth_number: u32) -> Option<&Tooth> {
        self.document.tooth(tooth_number)
    }

    pub fn teeth(&self) -> &[Tooth] {
        &self.document.teeth
    }

    /// 浅合并牙齿字段
    pub fn update_tooth(&mut self, tooth_number: u32, fields: &Map<String, Value>) {
        let Some(tooth) = self.document.tooth(tooth_number) else {
            debug!("update_tooth: tooth {} not found", tooth_number);
            return;
        };

        let merged = match apply_patch(tooth, fields) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Ignoring invalid update for tooth {}: {}", tooth_number, e);
                return;
            }
        };

        if merged.slice_ranges.as_ref().is_some_and(|ranges| !ranges.all_valid()) {
            warn!(
                "Ignoring update for tooth {} with a slice range whose start is after its end",
                tooth_number
            );
            return;
        }

        if merged.tooth_number != tooth_number && self.document.tooth(merged.tooth_number).is_some() {
            warn!(
                "Ignoring update renumbering tooth {} to existing tooth {}",
                tooth_number, merged.tooth_number
            );
            return;
        }

        if let Some(tooth) = self.document.tooth_mut(tooth_number) {
            *tooth = merged;
        }
        self.commit();
    }

    pub fn add_tooth_problem(&mut self, tooth_number: u32, problem: Problem) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("add_tooth_problem: tooth {} not found", tooth_number);
            return;
        };
        tooth.problems.push(problem);
        self.commit();
    }

    /// 设置审核状态（不进入历史）
    pub fn update_tooth_approval(&mut self, tooth_number: u32, approved: bool) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("update_tooth_approval: tooth {} not found", tooth_number);
            return;
        };
        tooth.approved = approved;
        self.persist();
    }

    /// 添加备注并记录当前时间（不进入历史）
    pub fn add_tooth_note(&mut self, tooth_number: u32, mut note: ToothNote) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("add_tooth_note: tooth {} not found", tooth_number);
            return;
        };
        note.date = Some(Utc::now());
        tooth.notes.push(note);
        self.persist();
    }

    /// 按位置更新备注并重新记录时间（不进入历史）
    pub fn update_tooth_note(&mut self, tooth_number: u32, index: usize, fields: &Map<String, Value>) {
        let Some(note) = self
            .document
            .tooth_mut(tooth_number)
            .and_then(|tooth| tooth.notes.get_mut(index))
        else {
            debug!("update_tooth_note: note {} on tooth {} not found", index, tooth_number);
            return;
        };

        match apply_patch(note, fields) {
            Ok(mut updated) => {
                updated.date = Some(Utc::now());
                *note = updated;
            }
            Err(e) => {
                warn!("Ignoring invalid note update on tooth {}: {}", tooth_number, e);
                return;
            }
        }
        self.persist();
    }

    /// 按位置删除备注（不进入历史）
    pub fn delete_tooth_note(&mut self, tooth_number: u32, index: usize) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("delete_tooth_note: tooth {} not found", tooth_number);
            return;
        };
        if index >= tooth.notes.len() {
            debug!("delete_tooth_note: note {} on tooth {} not found", index, tooth_number);
            return;
        }
        tooth.notes.remove(index);
        self.persist();
    }

    // ---- 切片范围（只读） ----

    pub fn tooth_slice_ranges(&self, tooth_number: u32, view: Option<&str>) -> Option<ToothSliceRanges> {
        slices::tooth_slice_ranges(&self.document, tooth_number, view)
    }

    pub fn all_teeth_slice_ranges(&self, view: Option<&str>) -> BTreeMap<u32, ToothSliceRanges> {
        slices::all_teeth_slice_ranges(&self.document, view)
    }

    pub fn view_slice_boundaries(&self, view: &str) -> Option<ViewBoundaries> {
        slices::view_slice_boundaries(&self.document, view)
    }

    pub fn find_teeth_in_slice(&self, slice: u32, view: &str) -> Vec<SliceHit> {
        slices::find_teeth_in_slice(&self.document, slice, view)
    }

    pub fn slice_ranges_statistics(&self) -> SliceRangeStatistics {
        slices::slice_ranges_statistics(&self.document)
    }

    // ---- 切片列表 ----

    pub fn add_tooth_slice(&mut self, tooth_number: u32, view: View, slice: u32) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("add_tooth_slice: tooth {} not found", tooth_number);
            return;
        };
        if !slices::add_slice(tooth, view, slice) {
            debug!("add_tooth_slice: slice {} already tagged on tooth {}", slice, tooth_number);
        }
        self.commit();
    }

    pub fn remove_tooth_slice(&mut self, tooth_number: u32, view: View, slice: u32) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("remove_tooth_slice: tooth {} not found", tooth_number);
            return;
        };
        if !slices::remove_slice(tooth, view, slice) {
            debug!("remove_tooth_slice: slice {} not tagged on tooth {}", slice, tooth_number);
        }
        self.commit();
    }

    pub fn set_tooth_slices(&mut self, tooth_number: u32, view: View, slice_list: Vec<u32>) {
        let Some(tooth) = self.document.tooth_mut(tooth_number) else {
            debug!("set_tooth_slices: tooth {} not found", tooth_number);
            return;
        };
        slices::set_slices(tooth, view, slice_list);
        self.commit();
    }

    /// 牙齿所有平面的标注切片
    pub fn tooth_slices(&self, tooth_number: u32) -> Option<&BTreeMap<String, Vec<u32>>> {
        self.document.tooth(tooth_number).map(|tooth| &tooth.slice)
    }

    /// 牙齿某一平面的标注切片
    pub fn tooth_view_slices(&self, tooth_number: u32, view: View) -> Option<&[u32]> {
        self.document
            .tooth(tooth_number)
            .and_then(|tooth| tooth.slice.get(view.as_str()))
            .map(Vec::as_slice)
    }

    // ---- 治疗计划 ----

    /// 追加治疗计划；planId 已存在时跳过
    pub fn add_treatment_plan(&mut self, plan: TreatmentPlan) {
        if !plan.plan_id.is_empty()
            && self.document.treatment_plan.iter().any(|p| p.plan_id == plan.plan_id)
        {
            warn!("Treatment plan {} already exists, skipping", plan.plan_id);
            return;
        }
        self.document.treatment_plan.push(plan);
        self.commit();
    }

    pub fn update_treatment_plan(&mut self, plan_id: &str, updates: &Map<String, Value>) {
        let Some(plan) = self.document.treatment_plan.iter().find(|p| p.plan_id == plan_id) else {
            debug!("update_treatment_plan: plan {} not found", plan_id);
            return;
        };

        let merged = match apply_patch(plan, updates) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Ignoring invalid update for plan {}: {}", plan_id, e);
                return;
            }
        };

        if merged.plan_id != plan_id
            && self.document.treatment_plan.iter().any(|p| p.plan_id == merged.plan_id)
        {
            warn!("Ignoring update renaming plan {} to existing plan {}", plan_id, merged.plan_id);
            return;
        }

        if let Some(plan) = self.document.plan_mut(plan_id) {
            *plan = merged;
        }
        self.commit();
    }

    // ---- 撤销/重做 ----

    /// 后退一步；已在历史起点时返回 false
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.document = snapshot;
                debug!("Undo to history index {:?}", self.history.cursor());
                self.persist();
                true
            }
            None => false,
        }
    }

    /// 前进一步；已在历史末尾时返回 false
    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(snapshot) => {
                self.document = snapshot;
                debug!("Redo to history index {:?}", self.history.cursor());
                self.persist();
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---- 派生查询 ----

    pub fn has_data(&self) -> bool {
        queries::has_data(&self.document)
    }

    pub fn has_patient_info(&self) -> bool {
        queries::has_patient_info(&self.document)
    }

    pub fn has_teeth_data(&self) -> bool {
        queries::has_teeth_data(&self.document)
    }

    pub fn has_scan_data(&self) -> bool {
        queries::has_scan_data(&self.document)
    }

    pub fn has_treatment_plans(&self) -> bool {
        queries::has_treatment_plans(&self.document)
    }

    pub fn has_problems(&self) -> bool {
        queries::has_problems(&self.document)
    }

    pub fn data_status(&self) -> DataStatus {
        queries::data_status(&self.document)
    }

    pub fn validate_data(&self) -> ValidationReport {
        queries::validate(&self.document)
    }

    pub fn problem_statistics(&self) -> BTreeMap<String, usize> {
        queries::problem_statistics(&self.document)
    }

    /// 导出当前文档副本，用于提交到后端
    pub fn export_data(&self) -> ReportDocument {
        self.document.clone()
    }

    pub fn export_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.document)?)
    }

    // ---- 报告类型 ----

    /// 设置报告类型（不进入历史）
    pub fn set_report_type(&mut self, report_type: impl Into<String>) {
        self.document.report_type = report_type.into();
        self.persist();
    }

    pub fn report_type(&self) -> &str {
        &self.document.report_type
    }

    pub fn is_pano(&self) -> bool {
        is_pano_type(&self.document.report_type)
    }

    pub fn is_cbct(&self) -> bool {
        is_cbct_type(&self.document.report_type)
    }

    // ---- 结论 ----

    pub fn set_conclusion(&mut self, text: impl Into<String>) {
        self.document.conclusion = text.into();
        self.document.conclusion_updated_at = Some(next_timestamp(self.document.conclusion_updated_at));
        self.commit();
    }

    pub fn conclusion(&self) -> &str {
        &self.document.conclusion
    }

    pub fn conclusion_updated_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.document.conclusion_updated_at
    }
}
