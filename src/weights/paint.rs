//! 权重绘制笔刷
//!
//! 笔刷以世界空间圆球作用于顶点，强度随距离线性衰减。
//! `Smooth` 模式与批量平滑使用相同的邻居平均。

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::smoothing::smooth_vertex;
use super::{normalize, VertexWeights};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushMode {
    #[default]
    Add,
    Subtract,
    Replace,
    Smooth,
}

/// 绘制笔刷
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Brush {
    pub mode: BrushMode,
    pub radius: f32,
    /// 笔刷强度 (0..1)
    pub strength: f32,
    pub neighbor_weight: f32,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            mode: BrushMode::Add,
            radius: 0.1,
            strength: 0.5,
            neighbor_weight: 0.5,
        }
    }
}

impl Brush {
    /// 距离衰减系数（中心为 1，半径处为 0）
    fn falloff(&self, distance: f32) -> f32 {
        if self.radius <= 0.0 || distance >= self.radius {
            0.0
        } else {
            1.0 - distance / self.radius
        }
    }

    /// 在 `center` 处对 `bone` 施加一笔，返回被修改的顶点数
    ///
    /// `positions` 为世界空间顶点，`adjacency` 仅在 `Smooth` 模式使用。
    pub fn stroke(
        &self,
        center: Vec3,
        bone: usize,
        positions: &[Vec3],
        adjacency: &[Vec<usize>],
        weights: &mut [VertexWeights],
    ) -> usize {
        let strength = self.strength.clamp(0.0, 1.0);
        let affected: Vec<(usize, f32, f32)> = positions
            .iter()
            .enumerate()
            .take(weights.len())
            .filter_map(|(i, p)| {
                let d = p.distance(center);
                let falloff = self.falloff(d);
                (falloff > 0.0).then(|| (i, falloff * strength, falloff))
            })
            .collect();

        // 平滑模式需要读取修改前的邻居
        let snapshot: Option<Vec<VertexWeights>> =
            (self.mode == BrushMode::Smooth).then(|| weights.to_vec());

        for &(i, f, falloff) in &affected {
            match self.mode {
                BrushMode::Add => blend_bone(&mut weights[i], bone, |w| w + f * (1.0 - w)),
                BrushMode::Subtract => blend_bone(&mut weights[i], bone, |w| w * (1.0 - f)),
                BrushMode::Replace => {
                    // 以衰减系数向笔刷强度靠拢，中心处恰好等于强度
                    blend_bone(&mut weights[i], bone, |w| w + (strength - w) * falloff)
                }
                BrushMode::Smooth => {
                    if let Some(before) = &snapshot {
                        let neighbors = adjacency.get(i).map(Vec::as_slice).unwrap_or(&[]);
                        let averaged = smooth_vertex(&before[i], neighbors, before, self.neighbor_weight);
                        weights[i] = lerp_weights(&before[i], &averaged, f);
                    }
                }
            }
        }
        if !affected.is_empty() {
            log::debug!("笔刷 {:?}: 骨骼 {} 影响 {} 个顶点", self.mode, bone, affected.len());
        }
        affected.len()
    }
}

/// 修改某骨骼权重并重新分配其余权重，保持和为 1
fn blend_bone(weights: &mut VertexWeights, bone: usize, f: impl Fn(f32) -> f32) {
    let current = weights.iter().find(|(b, _)| *b == bone).map(|(_, w)| *w).unwrap_or(0.0);
    let target = f(current).clamp(0.0, 1.0);
    let others: f32 = weights.iter().filter(|(b, _)| *b != bone).map(|(_, w)| *w).sum();

    let mut next: VertexWeights = Vec::with_capacity(weights.len() + 1);
    if others > 0.0 {
        let scale = (1.0 - target) / others;
        next.extend(weights.iter().filter(|(b, _)| *b != bone).map(|(b, w)| (*b, w * scale)));
    }
    if target > 0.0 {
        next.push((bone, target));
    }
    next.sort_by_key(|(b, _)| *b);
    normalize(&mut next);
    *weights = next;
}

fn lerp_weights(a: &VertexWeights, b: &VertexWeights, t: f32) -> VertexWeights {
    let mut out: VertexWeights = a.iter().map(|(bone, w)| (*bone, w * (1.0 - t))).collect();
    for &(bone, w) in b {
        match out.iter_mut().find(|(x, _)| *x == bone) {
            Some(entry) => entry.1 += w * t,
            None => out.push((bone, w * t)),
        }
    }
    out.sort_by_key(|(bone, _)| *bone);
    normalize(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> (Vec<Vec3>, Vec<Vec<usize>>) {
        let positions = vec![Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let adjacency = vec![vec![1], vec![0, 2], vec![1]];
        (positions, adjacency)
    }

    fn total(w: &VertexWeights) -> f32 {
        w.iter().map(|x| x.1).sum()
    }

    #[test]
    fn test_add_keeps_normalization_and_respects_radius() {
        let (positions, adjacency) = line();
        let mut weights = vec![vec![(0, 1.0)], vec![(0, 1.0)], vec![(0, 1.0)]];
        let brush = Brush { mode: BrushMode::Add, radius: 0.1, strength: 1.0, ..Brush::default() };
        let touched = brush.stroke(Vec3::ZERO, 1, &positions, &adjacency, &mut weights);
        assert_eq!(touched, 2);
        // 中心顶点完全替换为骨骼 1
        assert_eq!(weights[0], vec![(1, 1.0)]);
        assert_eq!(weights[1].len(), 2);
        assert!((total(&weights[1]) - 1.0).abs() < 1e-6);
        assert_eq!(weights[2], vec![(0, 1.0)]);
    }

    #[test]
    fn test_replace_reaches_strength_at_center() {
        let (positions, adjacency) = line();
        let mut weights = vec![vec![(0, 1.0)], vec![(0, 1.0)], vec![(0, 1.0)]];
        let brush = Brush { mode: BrushMode::Replace, radius: 0.1, strength: 0.4, ..Brush::default() };
        brush.stroke(Vec3::ZERO, 1, &positions, &adjacency, &mut weights);
        let w1 = weights[0].iter().find(|(b, _)| *b == 1).map(|x| x.1).unwrap();
        assert!((w1 - 0.4).abs() < 1e-6);
        assert!((total(&weights[0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_subtract_reduces_bone() {
        let (positions, adjacency) = line();
        let mut weights = vec![vec![(0, 0.5), (1, 0.5)], vec![], vec![]];
        let brush = Brush { mode: BrushMode::Subtract, radius: 0.01, strength: 0.5, ..Brush::default() };
        brush.stroke(Vec3::ZERO, 1, &positions, &adjacency, &mut weights);
        assert!((weights[0][1].1 - 0.25).abs() < 1e-6);
        assert!((weights[0][0].1 - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_smooth_matches_batch_average_at_full_strength() {
        let (positions, adjacency) = line();
        let mut weights = vec![vec![(0, 1.0)], vec![(1, 1.0)], vec![(1, 1.0)]];
        let expected = smooth_vertex(&weights[0], &adjacency[0], &weights, 0.5);
        let brush = Brush { mode: BrushMode::Smooth, radius: 0.01, strength: 1.0, neighbor_weight: 0.5 };
        brush.stroke(Vec3::ZERO, 0, &positions, &adjacency, &mut weights);
        assert_eq!(weights[0].len(), expected.len());
        for (a, b) in weights[0].iter().zip(&expected) {
            assert_eq!(a.0, b.0);
            assert!((a.1 - b.1).abs() < 1e-6);
        }
    }
}
