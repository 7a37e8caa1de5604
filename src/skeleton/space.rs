//! 世界空间 ↔ 父空间转换
//!
//! 骨骼在编辑时以世界空间存储，而蒙皮绑定和导出轨道都需要父空间（本地）变换。
//! 绑定器与导出烘焙必须使用同一组公式，否则绑定姿势与动画姿势会错位。

use glam::{Quat, Vec3};

use super::bone::normalize_rotation;
use super::BoneTransform;

/// 世界变换 → 父空间变换
///
/// - 有父骨骼：`local_pos = inv(parent_rot) * (world_pos - parent_pos)`，
///   `local_rot = inv(parent_rot) * world_rot`
/// - 根骨骼：直接使用世界变换
pub fn world_to_local(world: &BoneTransform, parent_world: Option<&BoneTransform>) -> BoneTransform {
    match parent_world {
        Some(parent) => {
            let (translation, rotation) = world_to_local_parts(
                world.translation,
                world.rotation,
                parent.translation,
                parent.rotation,
            );
            BoneTransform::new(translation, rotation, world.scale)
        }
        None => BoneTransform::new(world.translation, normalize_rotation(world.rotation), world.scale),
    }
}

/// 父空间变换 → 世界变换（`world_to_local` 的逆运算）
pub fn local_to_world(local: &BoneTransform, parent_world: Option<&BoneTransform>) -> BoneTransform {
    match parent_world {
        Some(parent) => {
            let (translation, rotation) = local_to_world_parts(
                local.translation,
                local.rotation,
                parent.translation,
                parent.rotation,
            );
            BoneTransform::new(translation, rotation, local.scale)
        }
        None => BoneTransform::new(local.translation, normalize_rotation(local.rotation), local.scale),
    }
}

/// 分量形式的世界 → 父空间转换
pub fn world_to_local_parts(
    world_pos: Vec3,
    world_rot: Quat,
    parent_pos: Vec3,
    parent_rot: Quat,
) -> (Vec3, Quat) {
    let inv_parent = normalize_rotation(parent_rot).inverse();
    let local_pos = inv_parent * (world_pos - parent_pos);
    let local_rot = normalize_rotation(inv_parent * normalize_rotation(world_rot));
    (local_pos, local_rot)
}

/// 分量形式的父空间 → 世界转换（正向运动学使用）
pub fn local_to_world_parts(
    local_pos: Vec3,
    local_rot: Quat,
    parent_pos: Vec3,
    parent_rot: Quat,
) -> (Vec3, Quat) {
    let parent_rot = normalize_rotation(parent_rot);
    let world_pos = parent_pos + parent_rot * local_pos;
    let world_rot = normalize_rotation(parent_rot * normalize_rotation(local_rot));
    (world_pos, world_rot)
}
