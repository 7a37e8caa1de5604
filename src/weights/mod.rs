//! 顶点权重
//!
//! 每个顶点是稀疏的 (骨骼索引, 权重) 列表，归一化后和为 1；
//! 空列表表示未加权，绑定时回退到最近骨骼。

mod calculator;
pub mod paint;
mod smoothing;

pub use calculator::{compute_weights, point_segment_distance, BoneSegment};
pub(crate) use calculator::nearest_joint;
pub use smoothing::{build_adjacency, smooth_weights};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个顶点的权重列表
pub type VertexWeights = Vec<(usize, f32)>;

/// 权重计算方法
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMethod {
    /// 包络：半径内按 (1 - d/r)^falloff 衰减
    #[default]
    Envelope,
    /// 热度图：高斯衰减
    Heatmap,
    /// 最近骨骼：单骨骼权重 1
    Nearest,
}

/// 权重计算参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightSettings {
    pub method: WeightMethod,
    /// 包络衰减指数
    pub falloff: f32,
    /// 包络半径 / 高斯 sigma 的下限（零长度骨骼使用）
    pub radius_floor: f32,
    /// 平滑迭代次数（0 为不平滑）
    pub smooth_iterations: usize,
    /// 平滑时邻居权重系数
    pub neighbor_weight: f32,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            method: WeightMethod::Envelope,
            falloff: 2.0,
            radius_floor: 0.05,
            smooth_iterations: 0,
            neighbor_weight: 0.5,
        }
    }
}

impl WeightSettings {
    /// 参数哈希（设置变化时使绑定缓存失效）
    pub fn settings_hash(&self) -> u64 {
        let text = format!(
            "{:?}:{}:{}:{}:{}",
            self.method,
            self.falloff.to_bits(),
            self.radius_floor.to_bits(),
            self.smooth_iterations,
            self.neighbor_weight.to_bits()
        );
        let digest = blake3::hash(text.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

/// 单个网格的权重数据
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshWeights {
    pub vertex_weights: Vec<VertexWeights>,
}

impl MeshWeights {
    pub fn new(vertex_weights: Vec<VertexWeights>) -> Self {
        Self { vertex_weights }
    }

    /// 是否覆盖全部顶点
    pub fn covers(&self, vertex_count: usize) -> bool {
        self.vertex_weights.len() == vertex_count
    }
}

/// 权重表（网格名 → 权重）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightMap {
    meshes: BTreeMap<String, MeshWeights>,
}

impl WeightMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mesh_name: &str) -> Option<&MeshWeights> {
        self.meshes.get(mesh_name)
    }

    pub fn get_mut(&mut self, mesh_name: &str) -> Option<&mut MeshWeights> {
        self.meshes.get_mut(mesh_name)
    }

    pub fn insert(&mut self, mesh_name: impl Into<String>, weights: MeshWeights) {
        self.meshes.insert(mesh_name.into(), weights);
    }

    pub fn remove(&mut self, mesh_name: &str) -> Option<MeshWeights> {
        self.meshes.remove(mesh_name)
    }

    pub fn mesh_names(&self) -> impl Iterator<Item = &String> {
        self.meshes.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// 删除骨骼后修正索引：指向被删骨骼的权重移除，其后的索引前移一位
    pub fn remove_bone_index(&mut self, removed: usize) {
        for mesh in self.meshes.values_mut() {
            for vertex in &mut mesh.vertex_weights {
                vertex.retain(|(bone, _)| *bone != removed);
                for (bone, _) in vertex.iter_mut() {
                    if *bone > removed {
                        *bone -= 1;
                    }
                }
                normalize(vertex);
            }
        }
    }
}

/// 归一化：和为 1；和为 0（或非有限）时清空
pub fn normalize(weights: &mut VertexWeights) {
    weights.retain(|(_, w)| w.is_finite() && *w > 0.0);
    let sum: f32 = weights.iter().map(|(_, w)| *w).sum();
    if sum > 0.0 {
        for (_, w) in weights.iter_mut() {
            *w /= sum;
        }
    } else {
        weights.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sums_to_one_or_empty() {
        let mut w = vec![(0, 2.0), (3, 6.0)];
        normalize(&mut w);
        assert!((w.iter().map(|x| x.1).sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((w[1].1 - 0.75).abs() < 1e-6);

        let mut empty = vec![(0, 0.0), (1, f32::NAN)];
        normalize(&mut empty);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_weight_map_json_shape() {
        let mut map = WeightMap::new();
        map.insert("body", MeshWeights::new(vec![vec![(0, 0.25), (1, 0.75)], vec![]]));
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["body"]["vertexWeights"][0][1], serde_json::json!([1, 0.75]));
        let back: WeightMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_remove_bone_index_shifts_and_renormalizes() {
        let mut map = WeightMap::new();
        map.insert("m", MeshWeights::new(vec![vec![(0, 0.5), (1, 0.25), (2, 0.25)]]));
        map.remove_bone_index(1);
        let v = &map.get("m").unwrap().vertex_weights[0];
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].0, 1);
        assert!((v[0].1 - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_settings_hash_changes_with_method() {
        let a = WeightSettings::default();
        let b = WeightSettings { method: WeightMethod::Heatmap, ..WeightSettings::default() };
        assert_ne!(a.settings_hash(), b.settings_hash());
        assert_eq!(a.settings_hash(), WeightSettings::default().settings_hash());
    }
}
