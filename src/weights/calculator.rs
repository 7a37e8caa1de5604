//! 自动权重计算（包络 / 热度图 / 最近骨骼）
//!
//! 骨骼视为从骨骼位置沿其本地 +Y 延伸 `length` 的线段，
//! 顶点到骨骼的距离是点到线段距离（最近骨骼方法除外，它使用点到关节距离）。

use glam::Vec3;
use rayon::prelude::*;

use super::{build_adjacency, normalize, smooth_weights, VertexWeights, WeightMethod, WeightSettings};
use crate::model::MeshData;
use crate::skeleton::Bone;

/// 骨骼线段
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneSegment {
    pub head: Vec3,
    pub tail: Vec3,
    pub length: f32,
}

impl BoneSegment {
    pub fn from_bone(bone: &Bone) -> Self {
        let length = if bone.length.is_finite() { bone.length.max(0.0) } else { 0.0 };
        Self {
            head: bone.position,
            tail: bone.tail(),
            length,
        }
    }

    pub fn distance(&self, point: Vec3) -> f32 {
        point_segment_distance(point, self.head, self.tail)
    }
}

/// 点到线段距离（零长度线段退化为点距离）
pub fn point_segment_distance(point: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return point.distance(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}

/// 单顶点的原始（未归一化）权重
fn vertex_weights(point: Vec3, segments: &[BoneSegment], settings: &WeightSettings) -> VertexWeights {
    let floor = settings.radius_floor.max(1e-6);
    match settings.method {
        WeightMethod::Envelope => segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let radius = (2.0 * s.length).max(floor);
                let d = s.distance(point);
                if d < radius {
                    Some((i, (1.0 - d / radius).powf(settings.falloff.max(0.0))))
                } else {
                    None
                }
            })
            .collect(),
        WeightMethod::Heatmap => segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let sigma = (1.5 * s.length).max(floor);
                let d = s.distance(point);
                (i, (-(d * d) / (2.0 * sigma * sigma)).exp())
            })
            .filter(|(_, w)| *w > 0.0)
            .collect(),
        WeightMethod::Nearest => nearest_joint(point, segments)
            .map(|i| vec![(i, 1.0)])
            .unwrap_or_default(),
    }
}

/// 最近关节（点到关节距离，相同距离取较小索引）
pub(crate) fn nearest_joint(point: Vec3, segments: &[BoneSegment]) -> Option<usize> {
    segments
        .iter()
        .enumerate()
        .map(|(i, s)| (i, s.head.distance_squared(point)))
        .filter(|(_, d)| d.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
        .map(|(i, _)| i)
}

/// 计算网格所有顶点的归一化权重
///
/// 顶点先转换到世界空间再与骨骼（世界空间）比较；逐顶点并行计算。
/// 可选平滑为离散扩散近似，并非测地热扩散。
pub fn compute_weights(mesh: &MeshData, bones: &[Bone], settings: &WeightSettings) -> Vec<VertexWeights> {
    let segments: Vec<BoneSegment> = bones.iter().map(BoneSegment::from_bone).collect();
    let positions = mesh.world_positions();

    let mut weights: Vec<VertexWeights> = positions
        .par_iter()
        .map(|p| {
            let mut w = vertex_weights(*p, &segments, settings);
            normalize(&mut w);
            w
        })
        .collect();

    if settings.smooth_iterations > 0 && settings.method != WeightMethod::Nearest {
        let adjacency = build_adjacency(mesh);
        smooth_weights(&mut weights, &adjacency, settings.smooth_iterations, settings.neighbor_weight);
    }

    let unweighted = weights.iter().filter(|w| w.is_empty()).count();
    log::debug!(
        "权重计算 ({:?}): {} 个顶点, {} 个骨骼, {} 个未加权顶点",
        settings.method,
        weights.len(),
        bones.len(),
        unweighted
    );
    weights
}
