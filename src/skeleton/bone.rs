//! 骨骼节点

use std::fmt;

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::BoneTransform;

/// 骨骼标识（不透明，在骨架内唯一）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoneId(pub u32);

impl fmt::Display for BoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 旋转限制（角度制，每轴 [min, max]）
///
/// 仅作提示用途，求值器不强制执行。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationLimits {
    pub x: [f32; 2],
    pub y: [f32; 2],
    pub z: [f32; 2],
}

impl Default for RotationLimits {
    fn default() -> Self {
        Self {
            x: [-180.0, 180.0],
            y: [-180.0, 180.0],
            z: [-180.0, 180.0],
        }
    }
}

fn default_scale() -> Vec3 {
    Vec3::ONE
}

/// 骨骼节点
///
/// `position` / `rotation` 都是世界空间；`scale` 是本地缩放倍数。
/// 父骨骼只能通过 [`Skeleton`](super::Skeleton) 修改，以保证层级始终为森林。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bone {
    pub id: BoneId,
    pub name: String,
    #[serde(default)]
    pub(crate) parent_id: Option<BoneId>,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default = "default_scale")]
    pub scale: Vec3,
    #[serde(default)]
    pub length: f32,
    #[serde(default)]
    pub rotation_limits: RotationLimits,
}

impl Bone {
    pub fn new(id: BoneId, name: impl Into<String>, position: Vec3) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id: None,
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            length: 0.0,
            rotation_limits: RotationLimits::default(),
        }
    }

    /// 指定父骨骼（仅用于构建，加入骨架时会校验）
    pub fn with_parent(mut self, parent: Option<BoneId>) -> Self {
        self.parent_id = parent;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_length(mut self, length: f32) -> Self {
        self.length = length.max(0.0);
        self
    }

    pub fn parent(&self) -> Option<BoneId> {
        self.parent_id
    }

    /// 归一化后的世界旋转（零四元数退化为单位旋转）
    pub fn world_rotation(&self) -> Quat {
        normalize_rotation(self.rotation)
    }

    /// 骨骼尾端：沿本地 +Y 方向延伸 `length`
    pub fn tail(&self) -> Vec3 {
        self.position + self.world_rotation() * Vec3::Y * self.length.max(0.0)
    }

    /// 世界空间变换
    pub fn world_transform(&self) -> BoneTransform {
        BoneTransform::new(self.position, self.world_rotation(), self.scale)
    }

    /// 世界矩阵（平移 * 旋转 * 缩放）
    pub fn world_matrix(&self) -> Mat4 {
        self.world_transform().to_matrix()
    }
}

/// 读取的旋转可能未归一化；零或非有限四元数退化为单位旋转
pub fn normalize_rotation(q: Quat) -> Quat {
    if q.is_normalized() {
        q
    } else if q.length_squared() > f32::EPSILON && q.is_finite() {
        q.normalize()
    } else {
        Quat::IDENTITY
    }
}
