//! 人形布局：由高度剖面推导骨盆 / 胸 / 肩 / 颈 / 头高度，生成脊柱、双臂和双腿
//!
//! 高度窗口按标准站姿调校，非标准静止姿势只能尽力而为。

use glam::Vec3;

use super::{segment_count, BoneSuggestion, SuggestionList, SuggestionSettings};
use crate::geometry::{Axis, Extremity, GeometryAnalysis, HeightBand};

/// 身高比例窗口
const PELVIS_WINDOW: (f32, f32) = (0.40, 0.58);
const CHEST_WINDOW: (f32, f32) = (0.62, 0.75);
const SHOULDER_WINDOW: (f32, f32) = (0.75, 0.86);
const NECK_WINDOW: (f32, f32) = (0.84, 0.91);
const HEAD_FRACTION: f32 = 0.94;

/// 剖面检测到的身体标志
#[derive(Clone, Copy, Debug)]
struct Landmarks {
    pelvis_y: f32,
    chest_y: f32,
    shoulder_y: f32,
    neck_y: f32,
    head_y: f32,
    hip_width: f32,
    shoulder_width: f32,
    from_profile: bool,
}

/// 在身高窗口内查找横截面峰值（`widest = false` 时查找最窄处），返回 (y, 横向宽度)
fn band_peak(
    profile: &[HeightBand],
    base: f32,
    height: f32,
    window: (f32, f32),
    lateral: Axis,
    widest: bool,
) -> Option<(f32, f32)> {
    if !(height > f32::EPSILON) {
        return None;
    }
    let mut best: Option<&HeightBand> = None;
    for band in profile.iter().filter(|b| !b.is_empty()) {
        let fraction = (band.center_y() - base) / height;
        if fraction < window.0 || fraction > window.1 {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) if widest => band.cross_section() > current.cross_section(),
            Some(current) => band.cross_section() < current.cross_section(),
        };
        if better {
            best = Some(band);
        }
    }
    best.map(|b| (b.center_y(), b.width(lateral)))
}

fn detect_landmarks(analysis: &GeometryAnalysis) -> Landmarks {
    let base = analysis.bounds.min.y;
    let h = analysis.size.y;
    let lateral = analysis.lateral_axis();
    let lateral_size = lateral.component(analysis.size);
    let profile = &analysis.height_profile;
    let mid = |w: (f32, f32)| base + h * (w.0 + w.1) * 0.5;

    let pelvis = band_peak(profile, base, h, PELVIS_WINDOW, lateral, true);
    let chest = band_peak(profile, base, h, CHEST_WINDOW, lateral, true);
    let shoulder = band_peak(profile, base, h, SHOULDER_WINDOW, lateral, true);
    let neck = band_peak(profile, base, h, NECK_WINDOW, lateral, false);

    let pelvis_y = pelvis.map_or(mid(PELVIS_WINDOW), |p| p.0);
    // 保证自下而上的顺序
    let chest_y = chest.map_or(mid(CHEST_WINDOW), |p| p.0).max(pelvis_y + 0.05 * h);
    let shoulder_y = shoulder.map_or(mid(SHOULDER_WINDOW), |p| p.0).max(chest_y + 0.02 * h);
    let neck_y = neck.map_or(mid(NECK_WINDOW), |p| p.0).max(shoulder_y + 0.02 * h);
    let head_y = (base + HEAD_FRACTION * h).max(neck_y + 0.02 * h);

    let hip_width = pelvis
        .map_or(0.35 * lateral_size, |p| p.1)
        .clamp(0.1 * lateral_size, 0.6 * lateral_size);
    let shoulder_width = shoulder
        .map_or(0.5 * lateral_size, |p| p.1)
        .clamp(0.2 * lateral_size, 0.8 * lateral_size);

    Landmarks {
        pelvis_y,
        chest_y,
        shoulder_y,
        neck_y,
        head_y,
        hip_width,
        shoulder_width,
        from_profile: pelvis.is_some() && chest.is_some() && shoulder.is_some(),
    }
}

/// 同侧检测末端中横向偏移最大的一个（偏移需达到阈值且满足高度条件）
pub(crate) fn pick_side_extremity<'a>(
    extremities: &'a [Extremity],
    center: Vec3,
    lateral: Axis,
    side: f32,
    min_offset: f32,
    accept_y: impl Fn(f32) -> bool,
) -> Option<&'a Extremity> {
    let mut best: Option<(&Extremity, f32)> = None;
    for e in extremities {
        let offset = (lateral.component(e.position) - lateral.component(center)) * side;
        if offset < min_offset || !accept_y(e.position.y) {
            continue;
        }
        if best.map_or(true, |(_, o)| offset > o) {
            best = Some((e, offset));
        }
    }
    best.map(|(e, _)| e)
}

pub(crate) fn suggest(analysis: &GeometryAnalysis, settings: &SuggestionSettings) -> Vec<BoneSuggestion> {
    let mut list = SuggestionList::new(analysis, settings);
    let lm = detect_landmarks(analysis);
    let h = analysis.size.y;
    let base = analysis.bounds.min.y;
    let lateral = analysis.lateral_axis();
    let lateral_size = lateral.component(analysis.size);
    let center = analysis.center;
    let spacing = settings.spacing_factor * analysis.size.max_element();
    let landmark_confidence = if lm.from_profile { 0.7 } else { 0.4 };

    let at = |offset: f32, y: f32| {
        let mut p = center;
        p.y = y;
        p[lateral.index()] += offset;
        p
    };

    let root = list.push("root", at(0.0, lm.pelvis_y - 0.05 * h), None, 0.9);
    let pelvis = list.push("pelvis", at(0.0, lm.pelvis_y), Some(root), landmark_confidence);

    let spine_segments = segment_count(
        lm.chest_y - lm.pelvis_y,
        spacing,
        settings.min_spine_segments,
        settings.max_spine_segments,
    );
    let pelvis_pos = list.position(pelvis);
    let chest_pos = at(0.0, lm.chest_y);
    let spine_end = pelvis_pos.lerp(chest_pos, spine_segments as f32 / (spine_segments + 1) as f32);
    let spine_top = list.push_chain("spine", pelvis_pos, spine_end, spine_segments, pelvis, landmark_confidence);
    let chest = list.push("chest", chest_pos, Some(spine_top), landmark_confidence);
    let neck = list.push("neck", at(0.0, lm.neck_y), Some(chest), landmark_confidence);
    list.push("head", at(0.0, lm.head_y), Some(neck), landmark_confidence);

    for (side, suffix) in [(1.0_f32, "l"), (-1.0_f32, "r")] {
        // 手臂
        let clavicle = list.push(
            format!("clavicle_{suffix}"),
            at(side * lm.shoulder_width * 0.15, lm.shoulder_y),
            Some(chest),
            landmark_confidence,
        );
        let upper_arm_pos = at(side * lm.shoulder_width * 0.5, lm.shoulder_y);
        let upper_arm = list.push(format!("upper_arm_{suffix}"), upper_arm_pos, Some(clavicle), landmark_confidence);
        let hand_min_offset = settings.min_lateral_offset * lateral_size * 0.5;
        let hand_floor = base + 0.25 * h;
        let (hand_pos, hand_confidence) = match pick_side_extremity(
            &analysis.extremities,
            center,
            lateral,
            side,
            hand_min_offset,
            |y| y > hand_floor,
        ) {
            Some(e) => (e.position, 0.8),
            None => (at(side * (lm.shoulder_width * 0.5 + 0.05 * h), lm.pelvis_y), 0.4),
        };
        let lower_arm = list.push(
            format!("lower_arm_{suffix}"),
            upper_arm_pos.lerp(hand_pos, 0.5),
            Some(upper_arm),
            hand_confidence,
        );
        list.push(format!("hand_{suffix}"), hand_pos, Some(lower_arm), hand_confidence);

        // 腿
        let upper_leg_pos = at(side * lm.hip_width * 0.25, lm.pelvis_y - 0.03 * h);
        let upper_leg = list.push(format!("upper_leg_{suffix}"), upper_leg_pos, Some(pelvis), landmark_confidence);
        let foot_min_offset = settings.min_lateral_offset * lm.hip_width * 0.5;
        let foot_ceiling = base + 0.2 * h;
        let (foot_pos, foot_confidence) = match pick_side_extremity(
            &analysis.extremities,
            center,
            lateral,
            side,
            foot_min_offset,
            |y| y < foot_ceiling,
        ) {
            Some(e) => (e.position, 0.8),
            None => (at(side * lm.hip_width * 0.25, base + 0.03 * h), 0.4),
        };
        let lower_leg = list.push(
            format!("lower_leg_{suffix}"),
            upper_leg_pos.lerp(foot_pos, 0.5),
            Some(upper_leg),
            foot_confidence,
        );
        list.push(format!("foot_{suffix}"), foot_pos, Some(lower_leg), foot_confidence);
    }

    list.into_vec()
}
