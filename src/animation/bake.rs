//! 导出烘焙：世界空间轨道 → 父空间轨道
//!
//! 每个采样帧先求出整套动画姿势，再用父骨骼在同一帧的动画变换做转换，
//! 父骨骼本身被动画驱动时也能得到正确的本地值。

use std::collections::BTreeSet;

use super::evaluator::{evaluate_pose, RestPose};
use super::{AnimationClip, TrackProperty};
use crate::skeleton::{space, Skeleton};

/// 烘焙后的单条轨道（值已展平）
#[derive(Clone, Debug, PartialEq)]
pub struct BakedTrack {
    /// 骨架索引（也是导出关节索引）
    pub bone_index: usize,
    pub bone_name: String,
    pub property: TrackProperty,
    /// 时间（秒）= 帧号 / fps
    pub times: Vec<f32>,
    pub values: Vec<f32>,
}

impl BakedTrack {
    /// 导出轨道名 `<bone>.position|quaternion|scale`
    pub fn name(&self) -> String {
        format!("{}.{}", self.bone_name, self.property.export_suffix())
    }
}

/// 烘焙后的片段
#[derive(Clone, Debug, PartialEq)]
pub struct BakedClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<BakedTrack>,
}

/// 是否为应由外部逻辑驱动的根运动骨骼：根骨骼，或不带左右标记的 pelvis / hips / hip
pub fn is_root_motion_bone(name: &str, is_root: bool) -> bool {
    if is_root {
        return true;
    }
    let lower = name.to_lowercase();
    if lower.contains("left") || lower.contains("right") {
        return false;
    }
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let sided = tokens.iter().any(|t| matches!(*t, "l" | "r"));
    let pelvis_like = tokens.iter().any(|t| matches!(*t, "pelvis" | "hips" | "hip"));
    pelvis_like && !sided
}

/// 需要采样的帧：逐帧烘焙时为 `0..frame_count` 加上更靠后的关键帧，否则为关键帧并集
pub fn sample_frames(clip: &AnimationClip) -> Vec<u32> {
    let keys = clip.keyframe_frames();
    if keys.is_empty() {
        return Vec::new();
    }
    if !clip.needs_dense_bake() {
        return keys;
    }
    let mut frames: BTreeSet<u32> = (0..clip.frame_count).collect();
    if let Some(&last) = keys.last() {
        frames.insert(last);
    }
    frames.into_iter().collect()
}

/// 烘焙片段
///
/// `skeleton` 提供层级和名称；动画姿势在其副本上求值，原骨架不被修改。
pub fn bake_clip(clip: &AnimationClip, skeleton: &Skeleton, rest: &RestPose) -> BakedClip {
    let frames = sample_frames(clip);

    // (骨架索引, 属性)，按骨架顺序
    let mut targets: Vec<(usize, TrackProperty)> = clip
        .tracks
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| skeleton.index_of(t.bone_id).map(|i| (i, t.property)))
        .filter(|(i, property)| {
            let Some(bone) = skeleton.bone_at(*i) else {
                return false;
            };
            let suppressed = *property == TrackProperty::Position
                && is_root_motion_bone(&bone.name, skeleton.parent_index(*i).is_none());
            if suppressed {
                log::debug!("跳过根运动骨骼 {} 的位置轨道", bone.name);
            }
            !suppressed
        })
        .collect();
    targets.sort();
    targets.dedup();

    let mut tracks: Vec<BakedTrack> = targets
        .iter()
        .map(|&(bone_index, property)| BakedTrack {
            bone_index,
            bone_name: skeleton.bone_at(bone_index).map(|b| b.name.clone()).unwrap_or_default(),
            property,
            times: Vec::with_capacity(frames.len()),
            values: Vec::with_capacity(frames.len() * property.components()),
        })
        .collect();

    let mut posed = skeleton.clone();
    for &frame in &frames {
        evaluate_pose(clip, frame as f32, rest, &mut posed);
        let time = frame as f32 / clip.fps;
        for track in &mut tracks {
            let world = posed.world_transform(track.bone_index);
            let parent_world = posed.parent_index(track.bone_index).map(|p| posed.world_transform(p));
            let local = space::world_to_local(&world, parent_world.as_ref());
            track.times.push(time);
            match track.property {
                TrackProperty::Position => track.values.extend_from_slice(&local.translation.to_array()),
                TrackProperty::Rotation => track.values.extend_from_slice(&local.rotation.to_array()),
                TrackProperty::Scale => track.values.extend_from_slice(&local.scale.to_array()),
            }
        }
    }

    log::info!(
        "烘焙片段 {}: {} 个采样帧, {} 条轨道",
        clip.name,
        frames.len(),
        tracks.len()
    );
    BakedClip {
        name: clip.name.clone(),
        duration: clip.duration(),
        tracks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Interpolation, Keyframe};
    use glam::{Quat, Vec3};
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_root_motion_names() {
        assert!(is_root_motion_bone("anything", true));
        assert!(is_root_motion_bone("Pelvis", false));
        assert!(is_root_motion_bone("mixamorig:Hips", false));
        assert!(is_root_motion_bone("hip", false));
        assert!(!is_root_motion_bone("hip_l", false));
        assert!(!is_root_motion_bone("LeftHip", false));
        assert!(!is_root_motion_bone("upper_leg_r", false));
        assert!(!is_root_motion_bone("chip", false));
    }

    /// root → arm → hand
    fn rig() -> (Skeleton, [crate::skeleton::BoneId; 3]) {
        let mut skeleton = Skeleton::new();
        let root = skeleton.create_bone("root", Vec3::ZERO, None).unwrap();
        let arm = skeleton.create_bone("arm", Vec3::new(0.0, 1.0, 0.0), Some(root)).unwrap();
        let hand = skeleton.create_bone("hand", Vec3::new(0.0, 2.0, 0.0), Some(arm)).unwrap();
        (skeleton, [root, arm, hand])
    }

    #[test]
    fn test_local_values_use_animated_parent() {
        let (skeleton, [root, _, hand]) = rig();
        let mut clip = AnimationClip::new("c", "wave", 10.0, 11).unwrap();
        let turn = Quat::from_rotation_z(FRAC_PI_2);
        clip.set_keyframe(root, TrackProperty::Rotation, Keyframe::new(0, Quat::IDENTITY)).unwrap();
        clip.set_keyframe(root, TrackProperty::Rotation, Keyframe::new(10, turn)).unwrap();
        // 手的世界旋转与根一起转，本地旋转应保持单位
        clip.set_keyframe(hand, TrackProperty::Rotation, Keyframe::new(0, Quat::IDENTITY)).unwrap();
        clip.set_keyframe(hand, TrackProperty::Rotation, Keyframe::new(10, turn)).unwrap();

        let rest = RestPose::capture(&skeleton);
        let baked = bake_clip(&clip, &skeleton, &rest);
        assert_eq!(baked.tracks.len(), 2);
        let hand_track = baked.tracks.iter().find(|t| t.bone_name == "hand").unwrap();
        assert_eq!(hand_track.name(), "hand.quaternion");
        assert_eq!(hand_track.times, vec![0.0, 1.0]);
        let last = Quat::from_xyzw(hand_track.values[4], hand_track.values[5], hand_track.values[6], hand_track.values[7]);
        assert!(last.abs_diff_eq(Quat::IDENTITY, 1e-5));
        let root_track = baked.tracks.iter().find(|t| t.bone_name == "root").unwrap();
        let root_last = Quat::from_slice(&root_track.values[4..8]);
        assert!(root_last.abs_diff_eq(turn, 1e-5));
    }

    #[test]
    fn test_dense_bake_for_step() {
        let (skeleton, [_, arm, _]) = rig();
        let mut clip = AnimationClip::new("c", "step", 30.0, 5).unwrap();
        clip.set_keyframe(
            arm,
            TrackProperty::Position,
            Keyframe::new(0, Vec3::new(0.0, 1.0, 0.0)).with_interpolation(Interpolation::Step),
        )
        .unwrap();
        clip.set_keyframe(arm, TrackProperty::Position, Keyframe::new(3, Vec3::new(1.0, 1.0, 0.0))).unwrap();
        assert_eq!(sample_frames(&clip), vec![0, 1, 2, 3, 4]);

        let baked = bake_clip(&clip, &skeleton, &RestPose::capture(&skeleton));
        let track = &baked.tracks[0];
        assert_eq!(track.name(), "arm.position");
        assert_eq!(track.times.len(), 5);
        // 第 2 帧仍是阶跃前的值
        assert_eq!(&track.values[6..9], &[0.0, 1.0, 0.0]);
        assert_eq!(&track.values[9..12], &[1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_root_position_suppressed() {
        let (skeleton, [root, _, _]) = rig();
        let mut clip = AnimationClip::new("c", "move", 30.0, 10).unwrap();
        clip.set_keyframe(root, TrackProperty::Position, Keyframe::new(0, Vec3::ZERO)).unwrap();
        clip.set_keyframe(root, TrackProperty::Position, Keyframe::new(9, Vec3::X)).unwrap();
        let baked = bake_clip(&clip, &skeleton, &RestPose::capture(&skeleton));
        assert!(baked.tracks.is_empty());
    }
}
