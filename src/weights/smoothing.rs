//! 权重平滑（基于三角形邻接的离散扩散）

use std::collections::BTreeSet;

use rayon::prelude::*;

use super::{normalize, VertexWeights};
use crate::model::MeshData;

/// 顶点邻接表（由三角形边构建，已去重并排序）
pub fn build_adjacency(mesh: &MeshData) -> Vec<Vec<usize>> {
    let count = mesh.vertex_count();
    let mut sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    for [a, b, c] in mesh.triangles() {
        if a >= count || b >= count || c >= count {
            continue;
        }
        for (u, v) in [(a, b), (b, c), (c, a)] {
            if u != v {
                sets[u].insert(v);
                sets[v].insert(u);
            }
        }
    }
    sets.into_iter().map(|s| s.into_iter().collect()).collect()
}

/// 单顶点平滑：(自身 + f·Σ邻居) / (1 + 度数)，随后归一化
pub(crate) fn smooth_vertex(
    own: &VertexWeights,
    neighbors: &[usize],
    weights: &[VertexWeights],
    neighbor_weight: f32,
) -> VertexWeights {
    if neighbors.is_empty() {
        return own.clone();
    }
    let mut acc: Vec<(usize, f32)> = own.clone();
    for &n in neighbors {
        for &(bone, w) in &weights[n] {
            match acc.iter_mut().find(|(b, _)| *b == bone) {
                Some(entry) => entry.1 += neighbor_weight * w,
                None => acc.push((bone, neighbor_weight * w)),
            }
        }
    }
    let denom = 1.0 + neighbors.len() as f32;
    for (_, w) in acc.iter_mut() {
        *w /= denom;
    }
    acc.sort_by_key(|(bone, _)| *bone);
    normalize(&mut acc);
    acc
}

/// 迭代平滑整套权重
pub fn smooth_weights(
    weights: &mut Vec<VertexWeights>,
    adjacency: &[Vec<usize>],
    iterations: usize,
    neighbor_weight: f32,
) {
    if adjacency.len() != weights.len() {
        log::warn!(
            "邻接表长度 {} 与权重长度 {} 不一致，跳过平滑",
            adjacency.len(),
            weights.len()
        );
        return;
    }
    for _ in 0..iterations {
        let current: &[VertexWeights] = weights;
        let next: Vec<VertexWeights> = current
            .par_iter()
            .zip(adjacency.par_iter())
            .map(|(own, neighbors)| smooth_vertex(own, neighbors, current, neighbor_weight))
            .collect();
        *weights = next;
    }
}
