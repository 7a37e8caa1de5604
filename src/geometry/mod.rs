//! 网格几何分析
//!
//! 输入世界空间顶点，输出包围盒、中心、高度剖面、对称轴与末端聚类，
//! 供骨骼建议使用。

mod analyzer;
mod extremity;
mod symmetry;

pub use analyzer::{analyze, analyze_bounds, analyze_mesh, height_profile};
pub use extremity::find_extremities;
pub use symmetry::detect_symmetry_axis;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// 坐标轴
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }

    pub fn component(self, v: Vec3) -> f32 {
        v[self.index()]
    }
}

/// 轴对齐包围盒
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// 点集包围盒；空点集返回原点处的零尺寸包围盒
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        points.iter().skip(1).fold(Self::new(*first, *first), |acc, p| Self {
            min: acc.min.min(*p),
            max: acc.max.max(*p),
        })
    }

    pub fn size(&self) -> Vec3 {
        (self.max - self.min).max(Vec3::ZERO)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// 三个方向尺寸的平均值
    pub fn average_size(&self) -> f32 {
        let s = self.size();
        (s.x + s.y + s.z) / 3.0
    }

    /// 将点限制在包围盒（外扩 `margin`）内
    pub fn clamp_point(&self, point: Vec3, margin: f32) -> Vec3 {
        let margin = Vec3::splat(margin.max(0.0));
        point.clamp(self.min - margin, self.max + margin)
    }
}

/// 高度剖面中的一个水平带
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightBand {
    pub y_min: f32,
    pub y_max: f32,
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub count: usize,
}

impl HeightBand {
    pub fn center_y(&self) -> f32 {
        (self.y_min + self.y_max) * 0.5
    }

    /// 指定水平轴上的宽度（`Axis::Y` 视为 X）
    pub fn width(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Z => self.max_z - self.min_z,
            _ => self.max_x - self.min_x,
        }
    }

    /// 横截面面积近似（X 宽 × Z 宽）
    pub fn cross_section(&self) -> f32 {
        (self.max_x - self.min_x) * (self.max_z - self.min_z)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// 末端聚类
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extremity {
    pub position: Vec3,
    pub point_count: usize,
    /// 聚类中心到网格中心的距离
    pub distance: f32,
}

/// 几何分析结果
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryAnalysis {
    pub center: Vec3,
    pub bounds: Aabb,
    pub size: Vec3,
    pub symmetry_axis: Axis,
    pub extremities: Vec<Extremity>,
    pub height_profile: Vec<HeightBand>,
}

impl GeometryAnalysis {
    pub fn height(&self) -> f32 {
        self.size.y
    }

    /// 除对称轴外的另一条水平轴（前后方向）
    pub fn forward_axis(&self) -> Axis {
        match self.symmetry_axis {
            Axis::Z => Axis::X,
            _ => Axis::Z,
        }
    }

    /// 左右方向轴；对称轴为 Y 时退化为 X
    pub fn lateral_axis(&self) -> Axis {
        match self.symmetry_axis {
            Axis::Z => Axis::Z,
            _ => Axis::X,
        }
    }
}

/// 分析参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    /// 高度剖面分带数量
    pub profile_bands: usize,
    /// 对称检测的最大采样点数
    pub symmetry_sample_limit: usize,
    /// 邻近容差（平均尺寸的比例）
    pub symmetry_tolerance: f32,
    /// 判定对称所需的最低匹配比例
    pub symmetry_min_ratio: f32,
    /// 固定对称轴（跳过检测）
    pub symmetry_override: Option<Axis>,
    /// 末端候选：距离中心最远的顶点比例
    pub extremity_percent: f32,
    /// 末端候选最少数量
    pub extremity_min_count: usize,
    /// 聚类距离阈值（平均尺寸的比例）
    pub cluster_fraction: f32,
    /// 最多返回的末端数量
    pub max_extremities: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            profile_bands: 24,
            symmetry_sample_limit: 500,
            symmetry_tolerance: 0.05,
            symmetry_min_ratio: 0.6,
            symmetry_override: None,
            extremity_percent: 0.05,
            extremity_min_count: 20,
            cluster_fraction: 0.15,
            max_extremities: 8,
        }
    }
}
