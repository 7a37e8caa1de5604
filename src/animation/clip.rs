//! 动画片段

use serde::{Deserialize, Serialize};

use super::keyframe::{Keyframe, TrackProperty};
use super::track::AnimationTrack;
use crate::skeleton::BoneId;
use crate::{Result, RigError};

/// 动画片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationClip {
    pub id: String,
    pub name: String,
    pub fps: f32,
    pub frame_count: u32,
    #[serde(default)]
    pub tracks: Vec<AnimationTrack>,
}

impl AnimationClip {
    pub fn new(id: impl Into<String>, name: impl Into<String>, fps: f32, frame_count: u32) -> Result<Self> {
        let clip = Self {
            id: id.into(),
            name: name.into(),
            fps,
            frame_count,
            tracks: Vec::new(),
        };
        clip.validate()?;
        Ok(clip)
    }

    /// 校验：fps > 0，帧数 ≥ 2，每条轨道的值与属性一致
    pub fn validate(&self) -> Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(RigError::InvalidClip(format!("{}: fps must be positive, got {}", self.id, self.fps)));
        }
        if self.frame_count < 2 {
            return Err(RigError::InvalidClip(format!(
                "{}: frame count must be at least 2, got {}",
                self.id, self.frame_count
            )));
        }
        if let Some(track) = self.tracks.iter().find(|t| !t.is_consistent()) {
            return Err(RigError::KeyframeValueMismatch(track.property));
        }
        Ok(())
    }

    /// 时长（秒）
    pub fn duration(&self) -> f32 {
        self.frame_count as f32 / self.fps
    }

    pub fn track(&self, bone_id: BoneId, property: TrackProperty) -> Option<&AnimationTrack> {
        self.tracks.iter().find(|t| t.bone_id == bone_id && t.property == property)
    }

    pub fn has_track(&self, bone_id: BoneId, property: TrackProperty) -> bool {
        self.track(bone_id, property).is_some_and(|t| !t.is_empty())
    }

    /// 设置关键帧，轨道不存在时创建
    pub fn set_keyframe(&mut self, bone_id: BoneId, property: TrackProperty, keyframe: Keyframe) -> Result<()> {
        let index = match self.tracks.iter().position(|t| t.bone_id == bone_id && t.property == property) {
            Some(i) => i,
            None => {
                self.tracks.push(AnimationTrack::new(bone_id, property));
                self.tracks.len() - 1
            }
        };
        if let Err(e) = self.tracks[index].insert_keyframe(keyframe) {
            if self.tracks[index].is_empty() {
                self.tracks.remove(index);
            }
            return Err(e);
        }
        Ok(())
    }

    /// 移除关键帧；轨道最后一个关键帧被移除时轨道一并删除
    pub fn remove_keyframe(&mut self, bone_id: BoneId, property: TrackProperty, frame: u32) -> Option<Keyframe> {
        let index = self.tracks.iter().position(|t| t.bone_id == bone_id && t.property == property)?;
        let removed = self.tracks[index].remove_keyframe(frame)?;
        if self.tracks[index].is_empty() {
            self.tracks.remove(index);
            log::debug!("轨道 {} {:?} 已无关键帧，删除", bone_id, property);
        }
        Some(removed)
    }

    /// 删除某骨骼的所有轨道（骨骼被删除时调用）
    pub fn remove_bone_tracks(&mut self, bone_id: BoneId) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.bone_id != bone_id);
        before - self.tracks.len()
    }

    /// 是否有任何轨道需要逐帧烘焙
    pub fn needs_dense_bake(&self) -> bool {
        self.tracks.iter().any(|t| t.needs_dense_bake())
    }

    /// 所有关键帧帧号（排序去重）
    pub fn keyframe_frames(&self) -> Vec<u32> {
        let mut frames: Vec<u32> = self
            .tracks
            .iter()
            .flat_map(|t| t.keyframes().iter().map(|k| k.frame))
            .collect();
        frames.sort_unstable();
        frames.dedup();
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn test_validation() {
        assert!(matches!(AnimationClip::new("a", "a", 0.0, 10), Err(RigError::InvalidClip(_))));
        assert!(matches!(AnimationClip::new("a", "a", 30.0, 1), Err(RigError::InvalidClip(_))));
        let clip = AnimationClip::new("a", "walk", 30.0, 60).unwrap();
        assert!((clip.duration() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_removing_last_keyframe_deletes_track() {
        let mut clip = AnimationClip::new("c", "c", 24.0, 48).unwrap();
        clip.set_keyframe(BoneId(2), TrackProperty::Position, Keyframe::new(0, Vec3::ZERO)).unwrap();
        clip.set_keyframe(BoneId(2), TrackProperty::Position, Keyframe::new(12, Vec3::X)).unwrap();
        assert_eq!(clip.tracks.len(), 1);

        assert!(clip.remove_keyframe(BoneId(2), TrackProperty::Position, 0).is_some());
        assert_eq!(clip.tracks.len(), 1);
        assert!(clip.remove_keyframe(BoneId(2), TrackProperty::Position, 12).is_some());
        assert!(clip.tracks.is_empty());
        assert!(clip.remove_keyframe(BoneId(2), TrackProperty::Position, 12).is_none());
    }

    #[test]
    fn test_mismatched_value_does_not_leave_empty_track() {
        let mut clip = AnimationClip::new("c", "c", 24.0, 48).unwrap();
        assert!(clip
            .set_keyframe(BoneId(0), TrackProperty::Rotation, Keyframe::new(0, Vec3::ONE))
            .is_err());
        assert!(clip.tracks.is_empty());
        clip.set_keyframe(BoneId(0), TrackProperty::Rotation, Keyframe::new(0, Quat::IDENTITY)).unwrap();
        assert!(clip.has_track(BoneId(0), TrackProperty::Rotation));
    }

    #[test]
    fn test_clip_json_round_trip_and_validation() {
        let json = r#"{"id": "c1", "name": "wave", "fps": 30, "frameCount": 20, "tracks": [
            {"boneId": 1, "property": "rotation", "keyframes": [{"frame": 0, "value": [0, 0, 0, 1]}]}]}"#;
        let clip: AnimationClip = serde_json::from_str(json).unwrap();
        clip.validate().unwrap();
        assert_eq!(clip.keyframe_frames(), vec![0]);

        let bad = r#"{"id": "c2", "name": "x", "fps": 30, "frameCount": 20, "tracks": [
            {"boneId": 1, "property": "scale", "keyframes": [{"frame": 0, "value": [0, 0, 0, 1]}]}]}"#;
        let clip: AnimationClip = serde_json::from_str(bad).unwrap();
        assert!(matches!(clip.validate(), Err(RigError::KeyframeValueMismatch(TrackProperty::Scale))));
    }
}
