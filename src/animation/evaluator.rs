//! 姿势求值与正向运动学
//!
//! 轨道值是世界空间的。没有显式位置（或旋转）轨道的骨骼
//! 由父骨骼当前变换与静止姿势中的本地偏移推导：
//!
//! ```text
//! child_pos = parent_pos + parent_rot * rest_local_offset
//! child_rot = parent_rot * rest_local_rotation
//! ```
//!
//! 按广度优先顺序遍历，父骨骼总是先于子骨骼求出。

use std::collections::HashMap;

use glam::{Quat, Vec3};

use super::{AnimationClip, TrackProperty};
use crate::skeleton::{space, BoneId, Skeleton};

/// 单个骨骼的静止姿势
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestBone {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// 相对父骨骼的本地偏移（根骨骼为世界位置）
    pub local_offset: Vec3,
    pub local_rotation: Quat,
}

/// 静止姿势快照
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestPose {
    bones: HashMap<BoneId, RestBone>,
    structure_hash: u64,
}

impl RestPose {
    pub fn capture(skeleton: &Skeleton) -> Self {
        let bones = skeleton
            .bones()
            .iter()
            .enumerate()
            .map(|(i, bone)| {
                let world = bone.world_transform();
                let parent_world = skeleton.parent_index(i).map(|p| skeleton.world_transform(p));
                let local = space::world_to_local(&world, parent_world.as_ref());
                let rest = RestBone {
                    position: world.translation,
                    rotation: world.rotation,
                    scale: bone.scale,
                    local_offset: local.translation,
                    local_rotation: local.rotation,
                };
                (bone.id, rest)
            })
            .collect();
        Self {
            bones,
            structure_hash: skeleton.structure_hash(),
        }
    }

    pub fn get(&self, id: BoneId) -> Option<&RestBone> {
        self.bones.get(&id)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// 快照是否仍对应该骨架的结构
    pub fn matches(&self, skeleton: &Skeleton) -> bool {
        self.bones.len() == skeleton.len() && self.structure_hash == skeleton.structure_hash()
    }
}

/// 在指定帧求值整套姿势并写回骨架（纯函数：相同输入得到相同输出）
pub fn evaluate_pose(clip: &AnimationClip, frame: f32, rest: &RestPose, skeleton: &mut Skeleton) {
    for index in skeleton.breadth_first_order() {
        let Some(bone) = skeleton.bone_at(index) else {
            continue;
        };
        let id = bone.id;
        let Some(rest_bone) = rest.get(id).copied() else {
            continue;
        };
        let parent = skeleton
            .parent_index(index)
            .and_then(|p| skeleton.bone_at(p))
            .map(|p| (p.position, p.world_rotation()));

        let sample = |property: TrackProperty| clip.track(id, property).and_then(|t| t.sample(frame));

        let (fk_position, fk_rotation) = match parent {
            Some((parent_pos, parent_rot)) => space::local_to_world_parts(
                rest_bone.local_offset,
                rest_bone.local_rotation,
                parent_pos,
                parent_rot,
            ),
            None => (rest_bone.position, rest_bone.rotation),
        };

        let position = sample(TrackProperty::Position)
            .and_then(|v| v.as_vec3())
            .unwrap_or(fk_position);
        let rotation = sample(TrackProperty::Rotation)
            .and_then(|v| v.as_quat())
            .unwrap_or(fk_rotation);
        let scale = sample(TrackProperty::Scale)
            .and_then(|v| v.as_vec3())
            .unwrap_or(rest_bone.scale);

        if let Some(bone) = skeleton.bone_at_mut(index) {
            bone.position = position;
            bone.rotation = rotation;
            bone.scale = scale;
        }
    }
}

/// 恢复静止姿势
pub fn restore_rest_pose(rest: &RestPose, skeleton: &mut Skeleton) {
    for index in 0..skeleton.len() {
        if let Some(bone) = skeleton.bone_at_mut(index) {
            if let Some(rest_bone) = rest.get(bone.id) {
                bone.position = rest_bone.position;
                bone.rotation = rest_bone.rotation;
                bone.scale = rest_bone.scale;
            }
        }
    }
}

/// 动画求值器：管理静止姿势的捕获与失效
#[derive(Clone, Debug, Default)]
pub struct Evaluator {
    rest: Option<RestPose>,
    rest_clip_id: Option<String>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rest_pose(&self) -> Option<&RestPose> {
        self.rest.as_ref()
    }

    /// 重新捕获静止姿势
    pub fn capture_rest(&mut self, skeleton: &Skeleton, clip_id: Option<&str>) {
        self.rest = Some(RestPose::capture(skeleton));
        self.rest_clip_id = clip_id.map(str::to_string);
        log::debug!("捕获静止姿势: {} 个骨骼, 片段 {:?}", skeleton.len(), clip_id);
    }

    /// 使静止姿势失效（非动画状态下骨架结构或静止变换改变时调用）
    pub fn invalidate_rest(&mut self) {
        self.rest = None;
        self.rest_clip_id = None;
    }

    /// 片段切换或开始播放时调用；返回是否重新捕获
    pub fn prepare(&mut self, skeleton: &Skeleton, clip_id: &str, playback_started: bool) -> bool {
        let clip_changed = self.rest_clip_id.as_deref() != Some(clip_id);
        if clip_changed || playback_started || self.rest.is_none() {
            self.capture_rest(skeleton, Some(clip_id));
            return true;
        }
        false
    }

    /// 在指定帧求值；缺少静止姿势或结构已变化时先捕获
    pub fn apply(&mut self, clip: &AnimationClip, frame: f32, skeleton: &mut Skeleton) {
        let stale = self.rest.as_ref().map_or(true, |r| !r.matches(skeleton));
        if stale {
            if let Some(rest) = &self.rest {
                // 结构变化后先恢复旧静止姿势，避免把动画姿势当作新的静止姿势
                restore_rest_pose(rest, skeleton);
            }
            self.capture_rest(skeleton, Some(&clip.id));
        } else if self.rest_clip_id.as_deref() != Some(clip.id.as_str()) {
            self.prepare(skeleton, &clip.id, false);
        }
        if let Some(rest) = &self.rest {
            evaluate_pose(clip, frame, rest, skeleton);
        }
    }

    /// 停止动画并恢复静止姿势
    pub fn reset(&mut self, skeleton: &mut Skeleton) {
        if let Some(rest) = &self.rest {
            restore_rest_pose(rest, skeleton);
        }
    }
}
