//! 网格数据与运行时状态

mod runtime;

pub use runtime::{EditMode, RigEvent, RigModel};

use glam::{Mat4, Vec3};

/// 网格数据（顶点为网格本地空间，`world_matrix` 为节点世界变换）
#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// 三角形索引；`None` 表示按顺序每三个顶点组成一个三角形
    pub indices: Option<Vec<u32>>,
    pub world_matrix: Mat4,
}

impl MeshData {
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>) -> Self {
        Self {
            name: name.into(),
            positions,
            normals: Vec::new(),
            indices: None,
            world_matrix: Mat4::IDENTITY,
        }
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_world_matrix(mut self, world_matrix: Mat4) -> Self {
        self.world_matrix = world_matrix;
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// 世界空间顶点位置
    pub fn world_positions(&self) -> Vec<Vec3> {
        if self.world_matrix == Mat4::IDENTITY {
            return self.positions.clone();
        }
        self.positions
            .iter()
            .map(|p| self.world_matrix.transform_point3(*p))
            .collect()
    }

    /// 世界空间法线；缺失时返回零向量
    pub fn world_normals(&self) -> Vec<Vec3> {
        if self.normals.len() != self.positions.len() {
            return vec![Vec3::ZERO; self.positions.len()];
        }
        let normal_matrix = self.world_matrix.inverse().transpose();
        self.normals
            .iter()
            .map(|n| normal_matrix.transform_vector3(*n).normalize_or_zero())
            .collect()
    }

    /// 三角形列表（越界索引和不完整三角形被忽略）
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        let count = self.positions.len();
        match &self.indices {
            Some(indices) => indices
                .chunks_exact(3)
                .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
                .filter(|t| t.iter().all(|&i| i < count))
                .collect(),
            None => (0..count / 3).map(|t| [t * 3, t * 3 + 1, t * 3 + 2]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unindexed_triangles_are_sequential() {
        let mesh = MeshData::new("m", vec![Vec3::ZERO; 7]);
        assert_eq!(mesh.triangles(), vec![[0, 1, 2], [3, 4, 5]]);
    }

    #[test]
    fn test_world_positions_apply_matrix() {
        let mesh = MeshData::new("m", vec![Vec3::X])
            .with_world_matrix(Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)));
        assert_eq!(mesh.world_positions(), vec![Vec3::new(1.0, 2.0, 0.0)]);
    }

    #[test]
    fn test_out_of_range_indices_are_dropped() {
        let mesh = MeshData::new("m", vec![Vec3::ZERO; 3]).with_indices(vec![0, 1, 2, 0, 1, 9]);
        assert_eq!(mesh.triangles(), vec![[0, 1, 2]]);
    }
}
