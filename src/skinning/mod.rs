//! 骨骼绑定与顶点蒙皮
//!
//! - [`BindHierarchy`]：世界空间骨骼 → 父空间层级 + 逆绑定矩阵
//! - [`resolve_skin`]：每顶点最多 4 个骨骼影响
//! - [`SkeletonBinder`]：激活状态机、绑定缓存、渲染快照
//! - [`compute_skinning`]：CPU 线性混合蒙皮

mod binder;
mod skinning;

pub use binder::{resolve_skin, BindHierarchy, BindJoint, BinderState, SkeletonBinder, SkinSnapshot, SYNTHETIC_ROOT_NAME};
pub use skinning::compute_skinning;

use glam::{Mat4, Vec3};

/// 每顶点影响骨骼数
pub const MAX_INFLUENCES: usize = 4;

/// 蒙皮绑定数据（每顶点 4 个骨骼索引与权重，和为 1）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkinBinding {
    pub indices: Vec<[u16; MAX_INFLUENCES]>,
    pub weights: Vec<[f32; MAX_INFLUENCES]>,
}

impl SkinBinding {
    pub fn vertex_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// 蒙皮输入数据
pub struct SkinningInput<'a> {
    /// 绑定姿势下的顶点位置（世界空间）
    pub positions: &'a [Vec3],
    /// 绑定姿势下的顶点法线；长度不足时按零法线处理
    pub normals: &'a [Vec3],
    pub binding: &'a SkinBinding,
    /// 骨骼变换矩阵（已乘以逆绑定矩阵）
    pub joint_matrices: &'a [Mat4],
}

/// 蒙皮输出数据
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkinningOutput {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}
