//! 导出场景构建
//!
//! 关节层级使用与绑定器相同的世界 → 父空间转换，动画轨道使用导出烘焙结果。

use glam::{Mat4, Quat, Vec3};

use crate::animation::{bake_clip, AnimationClip, BakedClip, RestPose};
use crate::model::MeshData;
use crate::skeleton::Skeleton;
use crate::skinning::{BindHierarchy, SkinBinding};
use crate::{Result, RigError};

/// 导出关节（父空间变换）
#[derive(Clone, Debug, PartialEq)]
pub struct ExportJoint {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub inverse_bind: Mat4,
}

/// 导出网格（绑定姿势下的世界空间顶点）
#[derive(Clone, Debug, PartialEq)]
pub struct ExportMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

/// 导出场景
#[derive(Clone, Debug, PartialEq)]
pub struct ExportScene {
    pub joints: Vec<ExportJoint>,
    /// 唯一的顶层关节
    pub root: usize,
    pub mesh: ExportMesh,
    pub skin: SkinBinding,
    pub clips: Vec<BakedClip>,
}

/// 构建导出场景
///
/// 骨架应处于静止姿势；片段在骨架副本上求值烘焙。
pub fn build_scene(
    skeleton: &Skeleton,
    mesh: &MeshData,
    skin: &SkinBinding,
    clips: &[AnimationClip],
) -> Result<ExportScene> {
    if skin.vertex_count() != mesh.vertex_count() {
        return Err(RigError::Export(format!(
            "skin binding covers {} vertices but mesh {} has {}",
            skin.vertex_count(),
            mesh.name,
            mesh.vertex_count()
        )));
    }

    let hierarchy = BindHierarchy::build(skeleton)?;
    let mut joints: Vec<ExportJoint> = hierarchy
        .joints
        .iter()
        .map(|j| ExportJoint {
            name: j.name.clone(),
            parent: j.parent,
            children: Vec::new(),
            translation: j.local.translation,
            rotation: j.local.rotation,
            scale: j.local.scale,
            inverse_bind: j.inverse_bind,
        })
        .collect();
    for i in 0..joints.len() {
        if let Some(parent) = joints[i].parent {
            joints[parent].children.push(i);
        }
    }

    let mut seen = std::collections::HashSet::new();
    for joint in &joints {
        if !seen.insert(joint.name.as_str()) {
            log::warn!("骨骼名称重复: {}，导出轨道可能无法区分", joint.name);
        }
    }

    let rest = RestPose::capture(skeleton);
    let mut baked = Vec::with_capacity(clips.len());
    for clip in clips {
        clip.validate()?;
        baked.push(bake_clip(clip, skeleton, &rest));
    }

    let indices = mesh
        .triangles()
        .into_iter()
        .flat_map(|t| t.map(|i| i as u32))
        .collect();

    Ok(ExportScene {
        root: hierarchy.root(),
        joints,
        mesh: ExportMesh {
            name: mesh.name.clone(),
            positions: mesh.world_positions(),
            normals: if mesh.normals.len() == mesh.vertex_count() { mesh.world_normals() } else { Vec::new() },
            indices,
        },
        skin: skin.clone(),
        clips: baked,
    })
}
