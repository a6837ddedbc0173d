//! 切片范围查询与切片列表编辑
//!
//! 切片范围是牙齿在某一平面上可见的连续区间；切片列表是针对牙齿/平面
//! 手工标注的离散切片编号，两者互不影响。

use dental_core::{ReportDocument, SliceRange, SliceRanges, Tooth, View};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// 单个平面的切片范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewSliceRange {
    pub view: View,
    pub start: u32,
    pub end: u32,
    /// 切片数量 end - start + 1
    pub range: u64,
}

impl ViewSliceRange {
    pub fn new(view: View, range: SliceRange) -> Self {
        Self {
            view,
            start: range.start,
            end: range.end,
            range: range.len(),
        }
    }
}

/// 牙齿切片范围查询结果：指定平面时为单个范围，否则为全部平面
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToothSliceRanges {
    View(ViewSliceRange),
    All(SliceRanges),
}

/// 平面边界
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewBoundaries {
    pub view: View,
    pub min_start: u32,
    pub max_end: u32,
    pub total_range: u64,
    pub teeth_count: usize,
}

/// 包含某切片的牙齿
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceHit {
    pub tooth_number: u32,
    pub range: ViewSliceRange,
    /// 切片在该牙齿范围内的位置，从 1 开始
    pub relative_position: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRangeStats {
    pub teeth_count: usize,
    pub min_start: Option<u32>,
    pub max_end: Option<u32>,
    /// 各牙齿范围长度之和
    pub total_length: u64,
}

/// 切片范围统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceRangeStatistics {
    pub total_teeth: usize,
    pub teeth_with_ranges: usize,
    pub views: BTreeMap<View, ViewRangeStats>,
}

fn parse_view(view: &str) -> Option<View> {
    let parsed = View::parse(view);
    if parsed.is_none() {
        warn!(
            "Invalid view '{}'. Valid views: axial, sagittal, coronal",
            view
        );
    }
    parsed
}

fn ranges_for_tooth(tooth: &Tooth, view: Option<View>) -> Option<ToothSliceRanges> {
    let ranges = tooth.slice_ranges.as_ref()?;
    match view {
        Some(view) => ranges
            .get(view)
            .map(|range| ToothSliceRanges::View(ViewSliceRange::new(view, range))),
        None => Some(ToothSliceRanges::All(ranges.clone())),
    }
}

/// 查询单颗牙齿的切片范围
pub fn tooth_slice_ranges(
    document: &ReportDocument,
    tooth_number: u32,
    view: Option<&str>,
) -> Option<ToothSliceRanges> {
    let view = match view {
        Some(name) => Some(parse_view(name)?),
        None => None,
    };

    let Some(tooth) = document.tooth(tooth_number) else {
        warn!("Tooth {} not found in report", tooth_number);
        return None;
    };

    ranges_for_tooth(tooth, view)
}

/// 所有定义了切片范围的牙齿，按牙齿编号排序
pub fn all_teeth_slice_ranges(
    document: &ReportDocument,
    view: Option<&str>,
) -> BTreeMap<u32, ToothSliceRanges> {
    let view = match view {
        Some(name) => match parse_view(name) {
            Some(view) => Some(view),
            None => return BTreeMap::new(),
        },
        None => None,
    };

    document
        .teeth
        .iter()
        .filter(|tooth| tooth.tooth_number != 0)
        .filter_map(|tooth| ranges_for_tooth(tooth, view).map(|r| (tooth.tooth_number, r)))
        .collect()
}

fn view_ranges(document: &ReportDocument, view: View) -> impl Iterator<Item = (u32, SliceRange)> + '_ {
    document
        .teeth
        .iter()
        .filter(|tooth| tooth.tooth_number != 0)
        .filter_map(move |tooth| tooth.slice_range(view).map(|r| (tooth.tooth_number, r)))
        .filter(|(_, range)| range.is_valid())
}

/// 某平面上所有牙齿范围的整体边界
pub fn view_slice_boundaries(document: &ReportDocument, view: &str) -> Option<ViewBoundaries> {
    let view = parse_view(view)?;

    let mut boundaries: Option<ViewBoundaries> = None;
    for (_, range) in view_ranges(document, view) {
        let b = boundaries.get_or_insert(ViewBoundaries {
            view,
            min_start: range.start,
            max_end: range.end,
            total_range: 0,
            teeth_count: 0,
        });
        b.min_start = b.min_start.min(range.start);
        b.max_end = b.max_end.max(range.end);
        b.teeth_count += 1;
    }

    boundaries.map(|mut b| {
        b.total_range = SliceRange::new(b.min_start, b.max_end).len();
        b
    })
}

/// 查找范围（闭区间）包含该切片的牙齿
pub fn find_teeth_in_slice(document: &ReportDocument, slice: u32, view: &str) -> Vec<SliceHit> {
    let Some(view) = parse_view(view) else {
        return Vec::new();
    };

    let mut hits: Vec<SliceHit> = view_ranges(document, view)
        .filter_map(|(tooth_number, range)| {
            range.relative_position(slice).map(|relative_position| SliceHit {
                tooth_number,
                range: ViewSliceRange::new(view, range),
                relative_position,
            })
        })
        .collect();
    hits.sort_by_key(|hit| hit.tooth_number);
    hits
}

/// 一次遍历统计所有平面的切片范围
pub fn slice_ranges_statistics(document: &ReportDocument) -> SliceRangeStatistics {
    let mut views: BTreeMap<View, ViewRangeStats> = View::ALL
        .into_iter()
        .map(|view| (view, ViewRangeStats::default()))
        .collect();
    let mut teeth_with_ranges = 0;

    for tooth in &document.teeth {
        let Some(ranges) = tooth.slice_ranges.as_ref() else {
            continue;
        };
        if ranges.is_empty() {
            continue;
        }
        teeth_with_ranges += 1;

        for (view, range) in ranges.iter() {
            let stats = views.entry(view).or_default();
            stats.teeth_count += 1;
            stats.min_start = Some(stats.min_start.map_or(range.start, |m| m.min(range.start)));
            stats.max_end = Some(stats.max_end.map_or(range.end, |m| m.max(range.end)));
            stats.total_length += range.len();
        }
    }

    SliceRangeStatistics {
        total_teeth: document.teeth.len(),
        teeth_with_ranges,
        views,
    }
}

/// 添加标注切片，保持升序且不重复；返回是否发生变化
pub fn add_slice(tooth: &mut Tooth, view: View, slice: u32) -> bool {
    let slices = tooth.slice.entry(view.as_str().to_string()).or_default();
    if slices.contains(&slice) {
        return false;
    }
    slices.push(slice);
    slices.sort_unstable();
    true
}

/// 移除标注切片；返回是否发生变化
pub fn remove_slice(tooth: &mut Tooth, view: View, slice: u32) -> bool {
    match tooth.slice.get_mut(view.as_str()) {
        Some(slices) => {
            let before = slices.len();
            slices.retain(|&s| s != slice);
            slices.len() != before
        }
        None => false,
    }
}

/// 整体替换某平面的标注切片
pub fn set_slices(tooth: &mut Tooth, view: View, slices: Vec<u32>) {
    tooth.slice.insert(view.as_str().to_string(), slices);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tooth_with(number: u32, axial: Option<(u32, u32)>, coronal: Option<(u32, u32)>) -> Tooth {
        let mut tooth = Tooth::new(number);
        let mut ranges = SliceRanges::default();
        ranges.axial = axial.map(|(s, e)| SliceRange::new(s, e));
        ranges.coronal = coronal.map(|(s, e)| SliceRange::new(s, e));
        tooth.slice_ranges = Some(ranges);
        tooth
    }

    fn sample_document() -> ReportDocument {
        let mut doc = ReportDocument::default();
        doc.patient_info.patient_id = "P1".to_string();
        doc.teeth = vec![
            tooth_with(21, Some((12, 20)), None),
            tooth_with(11, Some((5, 10)), Some((40, 44))),
            Tooth::new(31),
        ];
        doc
    }

    #[test]
    fn test_single_view_range() {
        let doc = sample_document();
        let result = tooth_slice_ranges(&doc, 11, Some("AXIAL")).unwrap();
        assert_eq!(
            result,
            ToothSliceRanges::View(ViewSliceRange {
                view: View::Axial,
                start: 5,
                end: 10,
                range: 6
            })
        );
    }

    #[test]
    fn test_range_lookups_that_miss() {
        let doc = sample_document();
        assert_eq!(tooth_slice_ranges(&doc, 11, Some("oblique")), None);
        assert_eq!(tooth_slice_ranges(&doc, 21, Some("coronal")), None);
        assert_eq!(tooth_slice_ranges(&doc, 31, None), None);
        assert_eq!(tooth_slice_ranges(&doc, 48, None), None);
    }

    #[test]
    fn test_all_views_for_tooth() {
        let doc = sample_document();
        match tooth_slice_ranges(&doc, 11, None).unwrap() {
            ToothSliceRanges::All(ranges) => {
                assert_eq!(ranges.axial, Some(SliceRange::new(5, 10)));
                assert_eq!(ranges.coronal, Some(SliceRange::new(40, 44)));
                assert_eq!(ranges.sagittal, None);
            }
            other => panic!("expected all ranges, got {:?}", other),
        }
    }

    #[test]
    fn test_all_teeth_ranges_keyed_by_number() {
        let doc = sample_document();
        let all = all_teeth_slice_ranges(&doc, None);
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![11, 21]);

        let coronal = all_teeth_slice_ranges(&doc, Some("coronal"));
        assert_eq!(coronal.len(), 1);
        assert!(coronal.contains_key(&11));

        assert!(all_teeth_slice_ranges(&doc, Some("bogus")).is_empty());
    }

    #[test]
    fn test_view_boundaries() {
        let doc = sample_document();
        let b = view_slice_boundaries(&doc, "axial").unwrap();
        assert_eq!(b.min_start, 5);
        assert_eq!(b.max_end, 20);
        assert_eq!(b.total_range, 16);
        assert_eq!(b.teeth_count, 2);
        assert!(b.min_start <= b.max_end);

        assert_eq!(view_slice_boundaries(&doc, "sagittal"), None);
    }

    #[test]
    fn test_view_boundaries_none_without_ranges() {
        let mut doc = ReportDocument::default();
        doc.teeth.push(Tooth::new(11));
        assert_eq!(view_slice_boundaries(&doc, "axial"), None);
    }

    #[test]
    fn test_find_teeth_in_slice_is_inclusive() {
        let doc = sample_document();

        let hits = find_teeth_in_slice(&doc, 7, "axial");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tooth_number, 11);
        assert_eq!(hits[0].relative_position, 3);

        assert_eq!(find_teeth_in_slice(&doc, 5, "axial")[0].relative_position, 1);
        assert_eq!(find_teeth_in_slice(&doc, 10, "axial")[0].relative_position, 6);
        assert!(find_teeth_in_slice(&doc, 11, "axial").is_empty());
        assert_eq!(find_teeth_in_slice(&doc, 12, "axial")[0].tooth_number, 21);
        assert!(find_teeth_in_slice(&doc, 7, "nope").is_empty());
    }

    #[test]
    fn test_statistics_single_pass() {
        let doc = sample_document();
        let stats = slice_ranges_statistics(&doc);
        assert_eq!(stats.total_teeth, 3);
        assert_eq!(stats.teeth_with_ranges, 2);

        let axial = &stats.views[&View::Axial];
        assert_eq!(axial.teeth_count, 2);
        assert_eq!(axial.min_start, Some(5));
        assert_eq!(axial.max_end, Some(20));
        assert_eq!(axial.total_length, 6 + 9);

        let sagittal = &stats.views[&View::Sagittal];
        assert_eq!(sagittal.teeth_count, 0);
        assert_eq!(sagittal.min_start, None);
    }

    #[test]
    fn test_slice_list_edits() {
        let mut tooth = Tooth::new(11);
        assert!(add_slice(&mut tooth, View::Axial, 9));
        assert!(add_slice(&mut tooth, View::Axial, 3));
        assert!(!add_slice(&mut tooth, View::Axial, 9));
        assert_eq!(tooth.slice["axial"], vec![3, 9]);

        assert!(remove_slice(&mut tooth, View::Axial, 3));
        assert!(!remove_slice(&mut tooth, View::Axial, 3));
        assert!(!remove_slice(&mut tooth, View::Coronal, 3));
        assert_eq!(tooth.slice["axial"], vec![9]);

        set_slices(&mut tooth, View::Sagittal, vec![30, 10]);
        assert_eq!(tooth.slice["sagittal"], vec![30, 10]);
    }

    #[test]
    fn test_full_width_range() {
        let mut doc = ReportDocument::default();
        doc.teeth = vec![tooth_with(11, Some((0, u32::MAX)), None)];

        let hits = find_teeth_in_slice(&doc, u32::MAX, "axial");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relative_position, u64::from(u32::MAX) + 1);
        assert_eq!(hits[0].range.range, u64::from(u32::MAX) + 1);

        let b = view_slice_boundaries(&doc, "axial").unwrap();
        assert_eq!(b.total_range, u64::from(u32::MAX) + 1);
        assert_eq!(slice_ranges_statistics(&doc).views[&View::Axial].total_length, u64::from(u32::MAX) + 1);
    }

    #[test]
    fn test_inverted_range_is_skipped_by_queries() {
        let mut doc = ReportDocument::default();
        doc.teeth = vec![tooth_with(11, Some((10, 5)), None), tooth_with(21, Some((3, 4)), None)];

        let b = view_slice_boundaries(&doc, "axial").unwrap();
        assert_eq!((b.min_start, b.max_end, b.total_range, b.teeth_count), (3, 4, 2, 1));
        assert!(find_teeth_in_slice(&doc, 7, "axial").is_empty());
    }

    #[test]
    fn test_serialized_shapes() {
        let doc = sample_document();
        let hit = serde_json::to_value(&find_teeth_in_slice(&doc, 7, "axial")[0]).unwrap();
        assert_eq!(hit["toothNumber"], 11);
        assert_eq!(hit["relativePosition"], 3);
        assert_eq!(hit["range"]["view"], "axial");
        assert_eq!(hit["range"]["range"], 6);
    }
}
