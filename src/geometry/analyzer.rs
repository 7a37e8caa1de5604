//! 包围盒、中心与高度剖面

use glam::Vec3;

use super::{
    detect_symmetry_axis, find_extremities, Aabb, AnalyzerSettings, Axis, GeometryAnalysis, HeightBand,
};
use crate::model::MeshData;

/// 分析世界空间顶点
///
/// 顶点为空时退化为零尺寸包围盒分析：没有末端，高度剖面全部为空带。
pub fn analyze(vertices: &[Vec3], settings: &AnalyzerSettings) -> GeometryAnalysis {
    let finite: Vec<Vec3> = vertices.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return analyze_bounds(Aabb::default(), settings);
    }

    let bounds = Aabb::from_points(&finite);
    let center = bounds.center();
    let symmetry_axis = match settings.symmetry_override {
        Some(axis) => axis,
        None => detect_symmetry_axis(&finite, &bounds, settings),
    };
    let extremities = find_extremities(&finite, &bounds, settings);
    let height_profile = height_profile(&finite, &bounds, settings.profile_bands);

    log::debug!(
        "几何分析: {} 个顶点, 尺寸 {:?}, 对称轴 {:?}, {} 个末端",
        finite.len(),
        bounds.size(),
        symmetry_axis,
        extremities.len()
    );

    GeometryAnalysis {
        center,
        bounds,
        size: bounds.size(),
        symmetry_axis,
        extremities,
        height_profile,
    }
}

/// 分析网格：先应用节点世界矩阵
pub fn analyze_mesh(mesh: &MeshData, settings: &AnalyzerSettings) -> GeometryAnalysis {
    analyze(&mesh.world_positions(), settings)
}

/// 仅有包围盒（非网格节点）时的退化分析
pub fn analyze_bounds(bounds: Aabb, settings: &AnalyzerSettings) -> GeometryAnalysis {
    let center = bounds.center();
    GeometryAnalysis {
        center,
        bounds,
        size: bounds.size(),
        symmetry_axis: settings.symmetry_override.unwrap_or(Axis::X),
        extremities: Vec::new(),
        height_profile: height_profile(&[], &bounds, settings.profile_bands),
    }
}

/// 按 Y 方向把顶点分入 `bands` 个水平带，记录每带的 X/Z 范围与点数
///
/// 空带的范围取全局中心，避免下游读到 NaN / 无穷值。
pub fn height_profile(vertices: &[Vec3], bounds: &Aabb, bands: usize) -> Vec<HeightBand> {
    let bands = bands.max(1);
    let center = bounds.center();
    let height = bounds.size().y;
    let band_height = height / bands as f32;

    let mut min_xz = vec![Vec3::splat(f32::INFINITY); bands];
    let mut max_xz = vec![Vec3::splat(f32::NEG_INFINITY); bands];
    let mut counts = vec![0usize; bands];

    for v in vertices {
        let index = if height > f32::EPSILON {
            (((v.y - bounds.min.y) / height) * bands as f32).floor() as isize
        } else {
            0
        };
        let index = index.clamp(0, bands as isize - 1) as usize;
        min_xz[index] = min_xz[index].min(*v);
        max_xz[index] = max_xz[index].max(*v);
        counts[index] += 1;
    }

    (0..bands)
        .map(|i| {
            let y_min = bounds.min.y + band_height * i as f32;
            let (lo, hi) = if counts[i] > 0 {
                (min_xz[i], max_xz[i])
            } else {
                (center, center)
            };
            HeightBand {
                y_min,
                y_max: y_min + band_height,
                min_x: lo.x,
                max_x: hi.x,
                min_z: lo.z,
                max_z: hi.z,
                count: counts[i],
            }
        })
        .collect()
}
