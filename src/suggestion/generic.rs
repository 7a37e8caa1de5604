//! 通用启发式：根骨骼 + 沿较长水平轴的脊柱 + 每个末端一条肢体链

use std::collections::HashMap;

use glam::Vec3;

use super::{segment_count, BoneSuggestion, SuggestionList, SuggestionSettings};
use crate::geometry::{Axis, Extremity, GeometryAnalysis};

/// 末端方向分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum LimbKind {
    Head,
    Tail,
    Left,
    Right,
    Front,
    Back,
}

impl LimbKind {
    fn label(self) -> &'static str {
        match self {
            LimbKind::Head => "head",
            LimbKind::Tail => "tail",
            LimbKind::Left => "limb_left",
            LimbKind::Right => "limb_right",
            LimbKind::Front => "limb_front",
            LimbKind::Back => "limb_back",
        }
    }
}

/// 按方向分类末端：竖直方向为头 / 尾，否则按对称轴下的主水平分量分为左右 / 前后
pub(crate) fn classify(direction: Vec3, analysis: &GeometryAnalysis, vertical_threshold: f32) -> LimbKind {
    if direction.y >= vertical_threshold {
        return LimbKind::Head;
    }
    if direction.y <= -vertical_threshold {
        return LimbKind::Tail;
    }
    let lateral = analysis.lateral_axis().component(direction);
    let forward = analysis.forward_axis().component(direction);
    if lateral.abs() >= forward.abs() {
        if lateral >= 0.0 {
            LimbKind::Left
        } else {
            LimbKind::Right
        }
    } else if forward >= 0.0 {
        LimbKind::Front
    } else {
        LimbKind::Back
    }
}

/// 距离足够远的末端（最多 `max_limb_chains` 个）
pub(crate) fn usable_extremities<'a>(analysis: &'a GeometryAnalysis, settings: &SuggestionSettings) -> Vec<&'a Extremity> {
    let half_diagonal = analysis.size.length() * 0.5;
    analysis
        .extremities
        .iter()
        .filter(|e| e.distance >= settings.min_extremity_distance * half_diagonal && e.distance > f32::EPSILON)
        .take(settings.max_limb_chains)
        .collect()
}

pub(crate) fn suggest(analysis: &GeometryAnalysis, settings: &SuggestionSettings) -> Vec<BoneSuggestion> {
    let mut list = SuggestionList::new(analysis, settings);
    let size = analysis.size;
    let max_dim = size.x.max(size.y).max(size.z);
    let spacing = settings.spacing_factor * max_dim;

    let root_pos = analysis.center - Vec3::Y * settings.root_height_offset * size.y;
    let root = list.push("root", root_pos, None, 0.9);

    // 脊柱沿较长的水平轴
    let spine_axis = if size.x >= size.z { Axis::X } else { Axis::Z };
    let spine_length = spine_axis.component(size) * 0.4;
    let spine_segments = segment_count(
        spine_length,
        spacing,
        settings.min_spine_segments,
        settings.max_spine_segments,
    );
    let spine_end = root_pos + spine_axis.unit() * spine_length;
    list.push_chain("spine", root_pos, spine_end, spine_segments, root, 0.6);

    let mut used: HashMap<LimbKind, usize> = HashMap::new();
    let max_count = analysis.extremities.iter().map(|e| e.point_count).max().unwrap_or(1).max(1);
    for extremity in usable_extremities(analysis, settings) {
        let direction = (extremity.position - analysis.center).normalize_or_zero();
        let kind = classify(direction, analysis, settings.vertical_threshold);
        let ordinal = used.entry(kind).or_insert(0);
        *ordinal += 1;
        let prefix = if *ordinal == 1 {
            kind.label().to_string()
        } else {
            format!("{}{}", kind.label(), ordinal)
        };

        let length = root_pos.distance(extremity.position);
        let segments = segment_count(
            length,
            spacing,
            settings.min_limb_segments.max(2),
            settings.max_limb_segments.clamp(2, 4),
        );
        let confidence = 0.3 + 0.6 * extremity.point_count as f32 / max_count as f32;
        list.push_chain(&prefix, root_pos, extremity.position, segments, root, confidence);
    }

    list.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{analyze, AnalyzerSettings};

    /// 身体 + 头部向上突起 + 左右两条腿
    fn creature() -> GeometryAnalysis {
        let mut points = Vec::new();
        for i in 0..300 {
            let t = i as f32 * 0.53;
            points.push(Vec3::new(t.sin() * 2.0, (t * 0.8).cos() * 0.5 + 1.0, (t * 1.3).sin() * 0.6));
        }
        for i in 0..12 {
            let j = i as f32 * 0.02;
            points.push(Vec3::new(j, 3.0 + j, 0.0));
            points.push(Vec3::new(3.2 + j, 1.0, j));
            points.push(Vec3::new(-3.2 - j, 1.0, -j));
        }
        let settings = AnalyzerSettings {
            extremity_min_count: 36,
            symmetry_override: Some(Axis::X),
            ..AnalyzerSettings::default()
        };
        analyze(&points, &settings)
    }

    #[test]
    fn test_classify_directions() {
        let analysis = creature();
        assert_eq!(classify(Vec3::Y, &analysis, 0.7), LimbKind::Head);
        assert_eq!(classify(-Vec3::Y, &analysis, 0.7), LimbKind::Tail);
        assert_eq!(classify(Vec3::X, &analysis, 0.7), LimbKind::Left);
        assert_eq!(classify(-Vec3::X, &analysis, 0.7), LimbKind::Right);
        assert_eq!(classify(Vec3::Z, &analysis, 0.7), LimbKind::Front);
        assert_eq!(classify(-Vec3::Z, &analysis, 0.7), LimbKind::Back);
    }

    #[test]
    fn test_limb_chains_are_progressively_parented() {
        let analysis = creature();
        let suggestions = suggest(&analysis, &SuggestionSettings::default());
        assert_eq!(suggestions[0].name, "root");

        let chain_starts: Vec<&BoneSuggestion> = suggestions
            .iter()
            .filter(|s| s.name.ends_with("_01") && !s.name.starts_with("spine"))
            .collect();
        assert!(!chain_starts.is_empty());
        for start in chain_starts {
            assert_eq!(start.parent_index, Some(0));
        }
        for (i, s) in suggestions.iter().enumerate() {
            if s.name.ends_with("_02") {
                assert_eq!(s.parent_index, Some(i - 1));
            }
        }
    }

    #[test]
    fn test_chains_reach_extremities() {
        let analysis = creature();
        let suggestions = suggest(&analysis, &SuggestionSettings::default());
        let left_tip = suggestions
            .iter()
            .filter(|s| s.name.starts_with("limb_left_"))
            .last()
            .expect("left limb chain");
        assert!(left_tip.position.x > 2.5);
    }
}
