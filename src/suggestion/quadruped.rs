//! 四足布局：脊柱沿前后轴，颈 / 头向前，尾巴向后，四条腿各为 髋 → 膝 → 足

use glam::Vec3;

use super::generic::usable_extremities;
use super::humanoid::pick_side_extremity;
use super::{segment_count, BoneSuggestion, SuggestionList, SuggestionSettings};
use crate::geometry::{Axis, GeometryAnalysis};

pub(crate) fn suggest(analysis: &GeometryAnalysis, settings: &SuggestionSettings) -> Vec<BoneSuggestion> {
    let mut list = SuggestionList::new(analysis, settings);
    let size = analysis.size;
    let center = analysis.center;
    let h = size.y;
    let base = analysis.bounds.min.y;
    let spacing = settings.spacing_factor * size.max_element();

    let (long_axis, side_axis) = if size.x >= size.z { (Axis::X, Axis::Z) } else { (Axis::Z, Axis::X) };
    let length = long_axis.component(size);
    let width = side_axis.component(size);

    // 最高的末端通常是头部，决定朝前方向
    let front = usable_extremities(analysis, settings)
        .into_iter()
        .fold(None::<Vec3>, |best, e| match best {
            Some(b) if b.y >= e.position.y => Some(b),
            _ => Some(e.position),
        })
        .map(|p| long_axis.component(p - center))
        .filter(|offset| offset.abs() > f32::EPSILON)
        .map_or(1.0, f32::signum);

    let at = |along: f32, across: f32, y: f32| {
        let mut p = center;
        p[long_axis.index()] += along * front;
        p[side_axis.index()] += across;
        p.y = y;
        p
    };

    let spine_y = base + 0.65 * h;
    let root_pos = at(0.0, 0.0, spine_y);
    let root = list.push("root", root_pos, None, 0.8);

    let shoulder_along = 0.3 * length;
    let spine_segments = segment_count(
        shoulder_along,
        spacing,
        settings.min_spine_segments,
        settings.max_spine_segments,
    );
    let chest = list.push_chain("spine", root_pos, at(shoulder_along, 0.0, spine_y), spine_segments, root, 0.6);
    let neck = list.push("neck", at(0.42 * length, 0.0, spine_y + 0.1 * h), Some(chest), 0.5);
    list.push("head", at(0.5 * length, 0.0, spine_y + 0.2 * h), Some(neck), 0.5);

    let tail_segments = segment_count(
        0.2 * length,
        spacing,
        settings.min_limb_segments,
        settings.max_limb_segments,
    );
    list.push_chain(
        "tail",
        root_pos,
        at(-0.5 * length, 0.0, spine_y - 0.1 * h),
        tail_segments,
        root,
        0.5,
    );

    let foot_ceiling = base + 0.25 * h;
    for (along_sign, leg_parent, prefix) in [(1.0_f32, chest, "front"), (-1.0_f32, root, "back")] {
        for (side, side_name) in [(1.0_f32, "left"), (-1.0_f32, "right")] {
            let along = along_sign * shoulder_along;
            let across = side * 0.25 * width;
            let hip = list.push(
                format!("{prefix}_{side_name}_hip"),
                at(along, across, spine_y - 0.05 * h),
                Some(leg_parent),
                0.6,
            );
            let knee = list.push(format!("{prefix}_{side_name}_knee"), at(along, across, base + 0.3 * h), Some(hip), 0.5);

            // 同一象限内的低处末端优先作为足部
            let quadrant: Vec<_> = analysis
                .extremities
                .iter()
                .filter(|e| long_axis.component(e.position - center) * front * along_sign > 0.0)
                .copied()
                .collect();
            let (foot_pos, confidence) = match pick_side_extremity(
                &quadrant,
                center,
                side_axis,
                side,
                settings.min_lateral_offset * width * 0.25,
                |y| y < foot_ceiling,
            ) {
                Some(e) => (e.position, 0.8),
                None => (at(along, across, base + 0.02 * h), 0.4),
            };
            list.push(format!("{prefix}_{side_name}_foot"), foot_pos, Some(knee), confidence);
        }
    }

    list.into_vec()
}
