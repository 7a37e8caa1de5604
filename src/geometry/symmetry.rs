//! 对称轴检测
//!
//! 对每条候选轴独立检测：把均匀子采样的顶点关于中心镜像，统计镜像点附近
//! （容差内）存在真实顶点的比例。比例超过阈值且得分最高的轴胜出，否则默认 X。

use std::collections::HashMap;

use glam::Vec3;

use super::{Aabb, AnalyzerSettings, Axis};

/// 均匀网格哈希，用于容差范围内的邻近查询
struct PointGrid<'a> {
    points: &'a [Vec3],
    cell: f32,
    cells: HashMap<(i32, i32, i32), Vec<usize>>,
}

impl<'a> PointGrid<'a> {
    fn new(points: &'a [Vec3], cell: f32) -> Self {
        let mut cells: HashMap<(i32, i32, i32), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(Self::key(*p, cell)).or_default().push(i);
        }
        Self { points, cell, cells }
    }

    fn key(p: Vec3, cell: f32) -> (i32, i32, i32) {
        let k = (p / cell).floor();
        (k.x as i32, k.y as i32, k.z as i32)
    }

    fn has_neighbor(&self, p: Vec3, tolerance: f32) -> bool {
        let (kx, ky, kz) = Self::key(p, self.cell);
        let tolerance_sq = tolerance * tolerance;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(bucket) = self.cells.get(&(kx + dx, ky + dy, kz + dz)) {
                        if bucket.iter().any(|&i| self.points[i].distance_squared(p) <= tolerance_sq) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

/// 均匀子采样（步长采样，结果确定）
pub(crate) fn subsample(points: &[Vec3], limit: usize) -> Vec<Vec3> {
    if limit == 0 || points.is_empty() {
        return Vec::new();
    }
    let step = points.len().div_ceil(limit).max(1);
    points.iter().step_by(step).take(limit).copied().collect()
}

/// 检测对称轴
pub fn detect_symmetry_axis(vertices: &[Vec3], bounds: &Aabb, settings: &AnalyzerSettings) -> Axis {
    let tolerance = settings.symmetry_tolerance * bounds.average_size();
    if vertices.is_empty() || !(tolerance > f32::EPSILON) {
        return Axis::X;
    }

    let center = bounds.center();
    let sample = subsample(vertices, settings.symmetry_sample_limit);
    let grid = PointGrid::new(vertices, tolerance);

    let mut best: Option<(Axis, f32)> = None;
    for axis in Axis::ALL {
        let matched = sample
            .iter()
            .filter(|p| grid.has_neighbor(reflect(**p, center, axis), tolerance))
            .count();
        let ratio = matched as f32 / sample.len() as f32;
        log::debug!("对称检测: 轴 {:?} 匹配比例 {:.3}", axis, ratio);
        if ratio > settings.symmetry_min_ratio && best.map_or(true, |(_, score)| ratio > score) {
            best = Some((axis, ratio));
        }
    }
    best.map(|(axis, _)| axis).unwrap_or(Axis::X)
}

/// 关于中心沿指定轴镜像
fn reflect(p: Vec3, center: Vec3, axis: Axis) -> Vec3 {
    let mut r = p;
    let i = axis.index();
    r[i] = 2.0 * center[i] - p[i];
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings::default()
    }

    #[test]
    fn test_mirror_symmetric_in_x_only() {
        // 左右对称，但前后、上下都不对称的楔形点云
        let mut points = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                let y = j as f32 * 0.1;
                let z = i as f32 * 0.1 + y * y;
                let x = 0.2 + y * 0.5 + z * 0.1;
                points.push(Vec3::new(x, y, z));
                points.push(Vec3::new(-x, y, z));
            }
        }
        let bounds = Aabb::from_points(&points);
        let axis = detect_symmetry_axis(&points, &bounds, &settings());
        assert_eq!(axis, Axis::X);
    }

    #[test]
    fn test_symmetric_in_z() {
        let mut points = Vec::new();
        for i in 0..30 {
            let x = i as f32 * 0.1;
            let y = x * x * 0.3;
            let z = 0.5 + x * 0.2;
            points.push(Vec3::new(x, y, z));
            points.push(Vec3::new(x, y, -z));
        }
        let bounds = Aabb::from_points(&points);
        assert_eq!(detect_symmetry_axis(&points, &bounds, &settings()), Axis::Z);
    }

    #[test]
    fn test_no_symmetry_defaults_to_x() {
        // 只在一个角落的稀疏点
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.1, 0.0),
            Vec3::new(0.0, 1.0, 0.3),
            Vec3::new(0.9, 0.9, 1.0),
        ];
        let bounds = Aabb::from_points(&points);
        assert_eq!(detect_symmetry_axis(&points, &bounds, &settings()), Axis::X);
    }

    #[test]
    fn test_subsample_is_bounded() {
        let points: Vec<Vec3> = (0..1234).map(|i| Vec3::splat(i as f32)).collect();
        let sample = subsample(&points, 500);
        assert!(sample.len() <= 500);
        assert_eq!(sample[0], points[0]);
    }
}
