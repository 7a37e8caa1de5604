//! 顶点蒙皮计算（线性混合）

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use super::{SkinningInput, SkinningOutput, MAX_INFLUENCES};

/// 计算蒙皮
pub fn compute_skinning(input: &SkinningInput) -> SkinningOutput {
    let vertex_count = input.positions.len().min(input.binding.vertex_count());

    let (positions, normals): (Vec<Vec3>, Vec<Vec3>) = (0..vertex_count)
        .into_par_iter()
        .map(|i| {
            let normal = input.normals.get(i).copied().unwrap_or(Vec3::ZERO);
            compute_single_vertex(
                input.positions[i],
                normal,
                &input.binding.indices[i],
                &input.binding.weights[i],
                input.joint_matrices,
            )
        })
        .unzip();

    SkinningOutput { positions, normals }
}

/// 计算单个顶点的蒙皮
fn compute_single_vertex(
    position: Vec3,
    normal: Vec3,
    bones: &[u16; MAX_INFLUENCES],
    weights: &[f32; MAX_INFLUENCES],
    matrices: &[Mat4],
) -> (Vec3, Vec3) {
    let mut pos = Vec3::ZERO;
    let mut norm = Vec3::ZERO;
    let mut total = 0.0;

    for (&bone, &w) in bones.iter().zip(weights) {
        if w <= 0.0 {
            continue;
        }
        let m = get_matrix(matrices, bone);
        pos += m.transform_point3(position) * w;
        norm += m.transform_vector3(normal) * w;
        total += w;
    }

    if total <= 0.0 {
        return (position, normal);
    }
    (pos / total, norm.normalize_or_zero())
}

fn get_matrix(matrices: &[Mat4], index: u16) -> Mat4 {
    matrices.get(index as usize).copied().unwrap_or(Mat4::IDENTITY)
}
