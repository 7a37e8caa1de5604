//! 骨骼绑定器
//!
//! 编辑模式下处于 `Inactive`：显示原始网格，移动骨骼不变形表面。
//! 动画模式 / 播放时处于 `Active`：每帧刷新骨骼矩阵并发布蒙皮快照。
//!
//! 绑定缓存以骨架结构哈希 + 权重设置哈希为键，仅变换变化时只刷新矩阵。

use std::sync::Arc;

use glam::{Mat4, Vec3};

use super::{compute_skinning, SkinBinding, SkinningInput, MAX_INFLUENCES};
use crate::model::MeshData;
use crate::skeleton::{space, BoneId, BoneTransform, Skeleton};
use crate::weights::{compute_weights, nearest_joint, BoneSegment, MeshWeights, VertexWeights, WeightSettings};
use crate::{Result, RigError};

/// 合成根骨骼名称（多根骨架时插入）
pub const SYNTHETIC_ROOT_NAME: &str = "__rig_root";

/// 绑定层级中的关节
#[derive(Clone, Debug, PartialEq)]
pub struct BindJoint {
    pub name: String,
    /// 合成根为 `None`
    pub bone_id: Option<BoneId>,
    pub parent: Option<usize>,
    /// 父空间绑定变换
    pub local: BoneTransform,
    /// 世界空间绑定变换
    pub world: BoneTransform,
    pub inverse_bind: Mat4,
}

/// 绑定层级
///
/// 关节 `i` 对应骨架中第 `i` 个骨骼；多根时合成根追加在末尾，
/// 因此蒙皮索引与骨架索引一致。
#[derive(Clone, Debug, PartialEq)]
pub struct BindHierarchy {
    pub joints: Vec<BindJoint>,
    pub synthetic_root: Option<usize>,
}

impl BindHierarchy {
    pub fn build(skeleton: &Skeleton) -> Result<Self> {
        if skeleton.is_empty() {
            return Err(RigError::EmptySkeleton);
        }

        let roots = skeleton.roots();
        let synthetic_root = (roots.len() > 1).then_some(skeleton.len());

        let mut joints: Vec<BindJoint> = skeleton
            .bones()
            .iter()
            .enumerate()
            .map(|(i, bone)| {
                let world = bone.world_transform();
                let parent = skeleton.parent_index(i);
                let parent_world = parent.map(|p| skeleton.world_transform(p));
                let local = space::world_to_local(&world, parent_world.as_ref());
                BindJoint {
                    name: bone.name.clone(),
                    bone_id: Some(bone.id),
                    parent: parent.or(synthetic_root),
                    local,
                    world,
                    inverse_bind: world.to_matrix().inverse(),
                }
            })
            .collect();

        if synthetic_root.is_some() {
            // 合成根为单位变换，真实根的本地变换等于其世界变换
            joints.push(BindJoint {
                name: SYNTHETIC_ROOT_NAME.to_string(),
                bone_id: None,
                parent: None,
                local: BoneTransform::default(),
                world: BoneTransform::default(),
                inverse_bind: Mat4::IDENTITY,
            });
            log::debug!("骨架有 {} 个根骨骼，插入合成根", roots.len());
        }

        Ok(Self { joints, synthetic_root })
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// 唯一的顶层关节
    pub fn root(&self) -> usize {
        self.synthetic_root.unwrap_or_else(|| {
            self.joints.iter().position(|j| j.parent.is_none()).unwrap_or(0)
        })
    }

    /// 当前姿势下的关节矩阵（当前世界矩阵 × 逆绑定矩阵）
    pub fn joint_matrices(&self, skeleton: &Skeleton) -> Vec<Mat4> {
        self.joints
            .iter()
            .enumerate()
            .map(|(i, joint)| match joint.bone_id {
                Some(_) if i < skeleton.len() => skeleton.world_transform(i).to_matrix() * joint.inverse_bind,
                _ => Mat4::IDENTITY,
            })
            .collect()
    }
}

/// 解析每顶点蒙皮数据
///
/// 顺序：已存储权重（非空）→ 自动权重 → 最近骨骼。
/// 结果截取权重最大的 4 个，补零后归一化；总和为 0 时回退到 `[骨骼 0, 1]`。
pub fn resolve_skin(
    mesh: &MeshData,
    skeleton: &Skeleton,
    stored: Option<&MeshWeights>,
    settings: &WeightSettings,
) -> SkinBinding {
    let vertex_count = mesh.vertex_count();
    let bone_count = skeleton.len();

    let stored_for = |i: usize| -> Option<VertexWeights> {
        let list = stored?.vertex_weights.get(i)?;
        let valid: VertexWeights = list
            .iter()
            .copied()
            .filter(|(b, w)| *b < bone_count && w.is_finite() && *w > 0.0)
            .collect();
        (!valid.is_empty()).then_some(valid)
    };

    let mut resolved: Vec<Option<VertexWeights>> = (0..vertex_count).map(stored_for).collect();

    let missing = resolved.iter().filter(|w| w.is_none()).count();
    if missing > 0 && bone_count > 0 {
        log::debug!("网格 {} 有 {} 个顶点缺少权重，使用自动权重", mesh.name, missing);
        let auto = compute_weights(mesh, skeleton.bones(), settings);
        for (slot, weights) in resolved.iter_mut().zip(auto) {
            if slot.is_none() && !weights.is_empty() {
                *slot = Some(weights);
            }
        }
    }

    let segments: Vec<BoneSegment> = skeleton.bones().iter().map(BoneSegment::from_bone).collect();
    let positions = mesh.world_positions();

    let mut binding = SkinBinding {
        indices: Vec::with_capacity(vertex_count),
        weights: Vec::with_capacity(vertex_count),
    };
    for (i, slot) in resolved.into_iter().enumerate() {
        let weights = slot.unwrap_or_else(|| {
            nearest_joint(positions[i], &segments)
                .map(|b| vec![(b, 1.0)])
                .unwrap_or_default()
        });
        let (indices, values) = top_influences(weights);
        binding.indices.push(indices);
        binding.weights.push(values);
    }
    binding
}

/// 截取前 4 个影响，补零并归一化
fn top_influences(mut weights: VertexWeights) -> ([u16; MAX_INFLUENCES], [f32; MAX_INFLUENCES]) {
    weights.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    weights.truncate(MAX_INFLUENCES);

    let mut indices = [0u16; MAX_INFLUENCES];
    let mut values = [0.0f32; MAX_INFLUENCES];
    let total: f32 = weights.iter().map(|(_, w)| *w).sum();
    if total <= 0.0 || !total.is_finite() {
        values[0] = 1.0;
        return (indices, values);
    }
    for (slot, (bone, w)) in weights.into_iter().enumerate() {
        indices[slot] = u16::try_from(bone).unwrap_or(u16::MAX);
        values[slot] = w / total;
    }
    (indices, values)
}

/// 绑定器状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BinderState {
    #[default]
    Inactive,
    Active,
}

/// 渲染端读取的蒙皮快照（只读，按版本整体替换）
#[derive(Clone, Debug, Default)]
pub struct SkinSnapshot {
    pub version: u64,
    pub binding: Arc<SkinBinding>,
    pub joint_matrices: Vec<Mat4>,
    /// 变形后的世界空间顶点
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

/// 骨骼绑定器
pub struct SkeletonBinder {
    state: BinderState,
    settings: WeightSettings,
    hierarchy: Option<BindHierarchy>,
    binding: Option<Arc<SkinBinding>>,
    structure_hash: Option<u64>,
    settings_hash: Option<u64>,
    version: u64,
    build_count: u64,
    snapshot: Arc<SkinSnapshot>,
}

impl SkeletonBinder {
    pub fn new(settings: WeightSettings) -> Self {
        Self {
            state: BinderState::Inactive,
            settings,
            hierarchy: None,
            binding: None,
            structure_hash: None,
            settings_hash: None,
            version: 0,
            build_count: 0,
            snapshot: Arc::new(SkinSnapshot::default()),
        }
    }

    pub fn state(&self) -> BinderState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == BinderState::Active
    }

    pub fn settings(&self) -> &WeightSettings {
        &self.settings
    }

    /// 修改权重设置；哈希变化时缓存在下次更新时失效
    pub fn set_settings(&mut self, settings: WeightSettings) {
        self.settings = settings;
    }

    pub fn hierarchy(&self) -> Option<&BindHierarchy> {
        self.hierarchy.as_ref()
    }

    pub fn binding(&self) -> Option<&SkinBinding> {
        self.binding.as_deref()
    }

    /// 已执行的完整绑定次数
    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    /// 当前快照（渲染端持有 `Arc`，不会看到写到一半的数据）
    pub fn snapshot(&self) -> Arc<SkinSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// 强制下次更新时重新绑定
    pub fn invalidate(&mut self) {
        self.structure_hash = None;
        self.settings_hash = None;
    }

    /// Inactive → Active：重新绑定并发布首帧
    pub fn activate(&mut self, skeleton: &Skeleton, mesh: &MeshData, stored: Option<&MeshWeights>) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        self.invalidate();
        self.state = BinderState::Active;
        if let Err(e) = self.update(skeleton, mesh, stored) {
            self.deactivate();
            return Err(e);
        }
        log::info!("绑定器激活: {} 个关节, {} 个顶点", self.hierarchy.as_ref().map_or(0, |h| h.len()), mesh.vertex_count());
        Ok(())
    }

    /// Active → Inactive：拆除蒙皮网格，渲染端恢复原始网格
    pub fn deactivate(&mut self) {
        if self.state == BinderState::Inactive && self.hierarchy.is_none() {
            return;
        }
        self.state = BinderState::Inactive;
        self.hierarchy = None;
        self.binding = None;
        self.invalidate();
        self.version += 1;
        self.snapshot = Arc::new(SkinSnapshot {
            version: self.version,
            ..SkinSnapshot::default()
        });
        log::info!("绑定器停用");
    }

    /// 下次更新是否会重新绑定
    pub fn needs_rebuild(&self, skeleton: &Skeleton) -> bool {
        self.is_active()
            && (self.hierarchy.is_none()
                || self.structure_hash != Some(skeleton.structure_hash())
                || self.settings_hash != Some(self.settings.settings_hash()))
    }

    /// 每帧更新（骨架处于静止姿势时使用）
    pub fn update(&mut self, skeleton: &Skeleton, mesh: &MeshData, stored: Option<&MeshWeights>) -> Result<bool> {
        self.update_with_rest(skeleton, skeleton, mesh, stored)
    }

    /// 每帧更新：结构或设置变化时按 `rest` 重新绑定，然后按 `pose` 刷新矩阵
    ///
    /// 逆绑定矩阵与自动权重总是取自静止姿势，动画中途重新绑定也不会把当前帧当作绑定姿势。
    /// 返回是否执行了完整重新绑定。Inactive 时什么也不做。
    pub fn update_with_rest(
        &mut self,
        pose: &Skeleton,
        rest: &Skeleton,
        mesh: &MeshData,
        stored: Option<&MeshWeights>,
    ) -> Result<bool> {
        if !self.is_active() {
            return Ok(false);
        }

        let rebuilt = self.needs_rebuild(pose);
        if rebuilt {
            let hierarchy = BindHierarchy::build(rest)?;
            let binding = resolve_skin(mesh, rest, stored, &self.settings);
            self.hierarchy = Some(hierarchy);
            self.binding = Some(Arc::new(binding));
            self.structure_hash = Some(pose.structure_hash());
            self.settings_hash = Some(self.settings.settings_hash());
            self.build_count += 1;
            log::debug!("重新绑定骨架 (第 {} 次)", self.build_count);
        }

        self.refresh_matrices(pose, mesh);
        Ok(rebuilt)
    }

    /// 仅刷新骨骼矩阵并发布新快照
    fn refresh_matrices(&mut self, skeleton: &Skeleton, mesh: &MeshData) {
        let (Some(hierarchy), Some(binding)) = (&self.hierarchy, &self.binding) else {
            return;
        };
        let joint_matrices = hierarchy.joint_matrices(skeleton);
        let positions = mesh.world_positions();
        let normals = mesh.world_normals();
        let output = compute_skinning(&SkinningInput {
            positions: &positions,
            normals: &normals,
            binding,
            joint_matrices: &joint_matrices,
        });

        self.version += 1;
        self.snapshot = Arc::new(SkinSnapshot {
            version: self.version,
            binding: Arc::clone(binding),
            joint_matrices,
            positions: output.positions,
            normals: output.normals,
        });
    }
}

impl Default for SkeletonBinder {
    fn default() -> Self {
        Self::new(WeightSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::WeightMethod;
    use glam::Quat;

    fn two_bone() -> (Skeleton, BoneId, BoneId) {
        let mut skeleton = Skeleton::new();
        let root = skeleton.create_bone("root", Vec3::ZERO, None).unwrap();
        let child = skeleton.create_bone("child", Vec3::new(0.0, 1.0, 0.0), Some(root)).unwrap();
        skeleton.set_length(root, 1.0).unwrap();
        skeleton.set_length(child, 1.0).unwrap();
        (skeleton, root, child)
    }

    fn column() -> MeshData {
        let positions = (0..20).map(|i| Vec3::new(0.1, i as f32 * 0.1, 0.0)).collect();
        MeshData::new("column", positions)
    }

    fn assert_binding_normalized(binding: &SkinBinding, vertex_count: usize) {
        assert_eq!(binding.vertex_count(), vertex_count);
        for w in &binding.weights {
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6, "{w:?}");
        }
    }

    #[test]
    fn test_child_local_offset() {
        let (skeleton, _, _) = two_bone();
        let hierarchy = BindHierarchy::build(&skeleton).unwrap();
        assert_eq!(hierarchy.synthetic_root, None);
        let child = &hierarchy.joints[1];
        assert!((child.local.translation - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-6);
        assert!(child.local.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
        assert_eq!(child.parent, Some(0));
        assert_eq!(hierarchy.root(), 0);
    }

    #[test]
    fn test_rotated_parent_local_transform() {
        let mut skeleton = Skeleton::new();
        let root = skeleton.create_bone("root", Vec3::ZERO, None).unwrap();
        let rot = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        skeleton.set_world_transform(root, Vec3::ZERO, rot).unwrap();
        skeleton.create_bone("child", Vec3::new(-1.0, 0.0, 0.0), Some(root)).unwrap();
        let hierarchy = BindHierarchy::build(&skeleton).unwrap();
        assert!((hierarchy.joints[1].local.translation - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_multiple_roots_get_synthetic_root_last() {
        let mut skeleton = Skeleton::new();
        skeleton.create_bone("a", Vec3::X, None).unwrap();
        skeleton.create_bone("b", -Vec3::X, None).unwrap();
        let hierarchy = BindHierarchy::build(&skeleton).unwrap();
        assert_eq!(hierarchy.synthetic_root, Some(2));
        assert_eq!(hierarchy.joints.len(), 3);
        assert_eq!(hierarchy.joints[0].parent, Some(2));
        assert_eq!(hierarchy.joints[1].parent, Some(2));
        assert_eq!(hierarchy.joints[2].name, SYNTHETIC_ROOT_NAME);
        assert_eq!(hierarchy.joints.iter().filter(|j| j.parent.is_none()).count(), 1);
        assert_eq!(hierarchy.joints[0].local.translation, Vec3::X);
    }

    #[test]
    fn test_empty_skeleton_rejected() {
        assert!(matches!(BindHierarchy::build(&Skeleton::new()), Err(RigError::EmptySkeleton)));
    }

    #[test]
    fn test_resolve_skin_totals() {
        let (skeleton, _, _) = two_bone();
        let mesh = column();
        let binding = resolve_skin(&mesh, &skeleton, None, &WeightSettings::default());
        assert_binding_normalized(&binding, mesh.vertex_count());
    }

    #[test]
    fn test_stored_weights_take_priority_and_reduce_to_four() {
        let mut skeleton = Skeleton::new();
        for i in 0..6 {
            skeleton.create_bone(format!("b{i}"), Vec3::new(i as f32, 0.0, 0.0), None).unwrap();
        }
        let mesh = MeshData::new("m", vec![Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0)]);
        let stored = MeshWeights::new(vec![
            vec![(0, 0.1), (1, 0.3), (2, 0.2), (3, 0.25), (4, 0.05), (5, 0.1)],
            vec![],
        ]);
        let binding = resolve_skin(&mesh, &skeleton, Some(&stored), &WeightSettings::default());
        assert_eq!(binding.indices[0], [1, 3, 2, 0]);
        assert_binding_normalized(&binding, 2);
        // 空列表回退到自动权重：顶点正好在骨骼 5 上
        assert_eq!(binding.indices[1][0], 5);
    }

    #[test]
    fn test_nearest_fallback_when_out_of_envelope() {
        let (skeleton, _, _) = two_bone();
        let mesh = MeshData::new("far", vec![Vec3::new(0.0, 50.0, 0.0)]);
        let settings = WeightSettings { method: WeightMethod::Envelope, ..WeightSettings::default() };
        let binding = resolve_skin(&mesh, &skeleton, None, &settings);
        assert_eq!(binding.indices[0], [1, 0, 0, 0]);
        assert_eq!(binding.weights[0], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_binder_cache_and_state_machine() {
        let (mut skeleton, root, child) = two_bone();
        let mesh = column();
        let mut binder = SkeletonBinder::default();

        assert_eq!(binder.update(&skeleton, &mesh, None).unwrap(), false);
        assert_eq!(binder.build_count(), 0);

        binder.activate(&skeleton, &mesh, None).unwrap();
        assert!(binder.is_active());
        assert_eq!(binder.build_count(), 1);
        let first = binder.snapshot();

        // 仅变换变化：不重新绑定，只刷新矩阵
        skeleton
            .set_world_transform(child, Vec3::new(0.5, 1.0, 0.0), Quat::IDENTITY)
            .unwrap();
        assert_eq!(binder.update(&skeleton, &mesh, None).unwrap(), false);
        assert_eq!(binder.build_count(), 1);
        let second = binder.snapshot();
        assert!(second.version > first.version);
        assert_ne!(second.joint_matrices[1], Mat4::IDENTITY);

        // 结构变化：重新绑定
        skeleton.create_bone("extra", Vec3::new(0.0, 2.0, 0.0), Some(child)).unwrap();
        assert!(binder.update(&skeleton, &mesh, None).unwrap());
        assert_eq!(binder.build_count(), 2);

        // 设置变化：重新绑定
        binder.set_settings(WeightSettings { method: WeightMethod::Heatmap, ..WeightSettings::default() });
        assert!(binder.update(&skeleton, &mesh, None).unwrap());

        binder.deactivate();
        assert_eq!(binder.state(), BinderState::Inactive);
        assert!(binder.binding().is_none());
        assert!(binder.snapshot().positions.is_empty());
        let _ = root;
    }

    #[test]
    fn test_rebind_while_posed_uses_rest() {
        let (rest, root, _) = two_bone();
        let mesh = column();
        let mut binder = SkeletonBinder::default();
        binder.activate(&rest, &mesh, None).unwrap();

        let mut posed = rest.clone();
        posed
            .set_world_transform(root, Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2))
            .unwrap();
        binder.set_settings(WeightSettings { method: WeightMethod::Heatmap, ..WeightSettings::default() });
        assert!(binder.needs_rebuild(&posed));
        assert!(binder.update_with_rest(&posed, &rest, &mesh, None).unwrap());
        assert!(!binder.needs_rebuild(&posed));

        // 回到静止姿势，蒙皮结果应与原网格一致
        binder.update(&rest, &mesh, None).unwrap();
        let snapshot = binder.snapshot();
        for (skinned, original) in snapshot.positions.iter().zip(mesh.world_positions()) {
            assert!(skinned.abs_diff_eq(original, 1e-5), "{skinned:?} != {original:?}");
        }
    }

    #[test]
    fn test_snapshot_deforms_with_bones() {
        let (mut skeleton, root, _) = two_bone();
        let mesh = MeshData::new("p", vec![Vec3::new(0.0, 0.2, 0.0)]);
        let mut binder = SkeletonBinder::new(WeightSettings { method: WeightMethod::Nearest, ..WeightSettings::default() });
        binder.activate(&skeleton, &mesh, None).unwrap();
        assert!((binder.snapshot().positions[0] - Vec3::new(0.0, 0.2, 0.0)).length() < 1e-6);

        skeleton.set_world_transform(root, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY).unwrap();
        binder.update(&skeleton, &mesh, None).unwrap();
        assert!((binder.snapshot().positions[0] - Vec3::new(1.0, 0.2, 0.0)).length() < 1e-6);
    }
}
