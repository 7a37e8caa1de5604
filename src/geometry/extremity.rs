//! 末端检测：距离中心最远的顶点聚类

use std::cmp::Ordering;

use glam::Vec3;

use super::{Aabb, AnalyzerSettings, Extremity};

struct Cluster {
    sum: Vec3,
    count: usize,
}

impl Cluster {
    fn centroid(&self) -> Vec3 {
        self.sum / self.count as f32
    }
}

/// 取距离中心最远的 top-K 顶点（`extremity_percent`，至少 `extremity_min_count` 个），
/// 按距离阈值贪心聚类，返回最多 `max_extremities` 个聚类中心，大聚类优先。
/// 孤立点（没有邻居的单点聚类）被丢弃。
pub fn find_extremities(vertices: &[Vec3], bounds: &Aabb, settings: &AnalyzerSettings) -> Vec<Extremity> {
    let threshold = settings.cluster_fraction * bounds.average_size();
    if vertices.len() < 2 || !(threshold > f32::EPSILON) || settings.max_extremities == 0 {
        return Vec::new();
    }

    let center = bounds.center();
    let mut candidates: Vec<(usize, f32)> = vertices
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.distance(center)))
        .collect();
    // 距离降序，距离相同按索引，保证结果确定
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));

    let k = ((vertices.len() as f32 * settings.extremity_percent).ceil() as usize)
        .max(settings.extremity_min_count)
        .min(vertices.len());

    let mut clusters: Vec<Cluster> = Vec::new();
    for &(index, _) in candidates.iter().take(k) {
        let point = vertices[index];
        let nearest = clusters
            .iter_mut()
            .map(|c| {
                let d = c.centroid().distance(point);
                (c, d)
            })
            .filter(|(_, d)| *d <= threshold)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        match nearest {
            Some((cluster, _)) => {
                cluster.sum += point;
                cluster.count += 1;
            }
            None => clusters.push(Cluster { sum: point, count: 1 }),
        }
    }

    let mut extremities: Vec<Extremity> = clusters
        .into_iter()
        .filter(|c| c.count > 1)
        .map(|c| {
            let position = c.centroid();
            Extremity {
                position,
                point_count: c.count,
                distance: position.distance(center),
            }
        })
        .collect();

    extremities.sort_by(|a, b| {
        b.point_count
            .cmp(&a.point_count)
            .then(b.distance.partial_cmp(&a.distance).unwrap_or(Ordering::Equal))
            .then(compare_vec(a.position, b.position))
    });
    extremities.truncate(settings.max_extremities);
    extremities
}

fn compare_vec(a: Vec3, b: Vec3) -> Ordering {
    a.x.partial_cmp(&b.x)
        .unwrap_or(Ordering::Equal)
        .then(a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
        .then(a.z.partial_cmp(&b.z).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 中心球 + 两个方向的突出点簇
    fn star() -> Vec<Vec3> {
        let mut points = Vec::new();
        for i in 0..200 {
            let t = i as f32 * 0.731;
            points.push(Vec3::new(t.sin(), (t * 1.3).cos(), (t * 0.7).sin()) * 0.5);
        }
        for i in 0..15 {
            let jitter = i as f32 * 0.01;
            points.push(Vec3::new(3.0 + jitter, 0.0, jitter));
            points.push(Vec3::new(-3.0 - jitter, 0.0, -jitter));
        }
        // 远处的两个孤立点
        points.push(Vec3::new(0.0, 0.0, 3.4));
        points.push(Vec3::new(0.0, 0.0, -3.4));
        points
    }

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings {
            extremity_min_count: 32,
            ..AnalyzerSettings::default()
        }
    }

    #[test]
    fn test_clusters_at_protrusions() {
        let points = star();
        let bounds = Aabb::from_points(&points);
        let extremities = find_extremities(&points, &bounds, &settings());
        assert_eq!(extremities.len(), 2);
        for e in &extremities {
            assert!(e.position.x.abs() > 2.5);
            assert_eq!(e.point_count, 15);
        }
    }

    #[test]
    fn test_singleton_is_discarded() {
        let points = star();
        let bounds = Aabb::from_points(&points);
        let extremities = find_extremities(&points, &bounds, &settings());
        assert!(extremities.iter().all(|e| e.position.z.abs() < 3.0));
    }

    #[test]
    fn test_max_extremities_respected() {
        let points = star();
        let bounds = Aabb::from_points(&points);
        let settings = AnalyzerSettings {
            max_extremities: 1,
            ..settings()
        };
        assert_eq!(find_extremities(&points, &bounds, &settings).len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let points = star();
        let bounds = Aabb::from_points(&points);
        let settings = settings();
        assert_eq!(
            find_extremities(&points, &bounds, &settings),
            find_extremities(&points, &bounds, &settings)
        );
    }
}
