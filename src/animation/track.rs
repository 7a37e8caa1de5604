//! 动画轨道
//!
//! 存储单个骨骼单个属性的全部关键帧（按帧号排序且唯一），并提供插值采样。

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::keyframe::{Interpolation, KeyValue, Keyframe, TrackProperty};
use crate::skeleton::{normalize_rotation, BoneId};
use crate::{Result, RigError};

/// 动画轨道
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationTrack {
    pub bone_id: BoneId,
    pub property: TrackProperty,
    #[serde(deserialize_with = "deserialize_keyframes")]
    keyframes: Vec<Keyframe>,
}

/// 读取时按帧号排序去重（同帧后者覆盖前者）
fn deserialize_keyframes<'de, D>(deserializer: D) -> std::result::Result<Vec<Keyframe>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Keyframe>::deserialize(deserializer)?;
    let unique: BTreeMap<u32, Keyframe> = raw.into_iter().map(|k| (k.frame, k)).collect();
    Ok(unique.into_values().collect())
}

impl AnimationTrack {
    pub fn new(bone_id: BoneId, property: TrackProperty) -> Self {
        Self {
            bone_id,
            property,
            keyframes: Vec::new(),
        }
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 插入关键帧（同帧替换），返回被替换的旧关键帧
    pub fn insert_keyframe(&mut self, mut keyframe: Keyframe) -> Result<Option<Keyframe>> {
        if !keyframe.value.matches(self.property) {
            return Err(RigError::KeyframeValueMismatch(self.property));
        }
        if let KeyValue::Quat(q) = keyframe.value {
            keyframe.value = KeyValue::Quat(normalize_rotation(q));
        }
        match self.keyframes.binary_search_by_key(&keyframe.frame, |k| k.frame) {
            Ok(i) => Ok(Some(std::mem::replace(&mut self.keyframes[i], keyframe))),
            Err(i) => {
                self.keyframes.insert(i, keyframe);
                Ok(None)
            }
        }
    }

    /// 移除关键帧
    pub fn remove_keyframe(&mut self, frame: u32) -> Option<Keyframe> {
        let i = self.keyframes.binary_search_by_key(&frame, |k| k.frame).ok()?;
        Some(self.keyframes.remove(i))
    }

    pub fn keyframe_at(&self, frame: u32) -> Option<&Keyframe> {
        self.keyframes
            .binary_search_by_key(&frame, |k| k.frame)
            .ok()
            .map(|i| &self.keyframes[i])
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.keyframes.last().map(|k| k.frame)
    }

    /// 所有值都与属性匹配
    pub fn is_consistent(&self) -> bool {
        self.keyframes.iter().all(|k| k.value.matches(self.property))
    }

    /// 是否需要逐帧烘焙
    pub fn needs_dense_bake(&self) -> bool {
        self.keyframes.iter().any(|k| k.interpolation.needs_dense_bake())
    }

    /// 在任意（可为小数）帧采样
    ///
    /// 精确命中关键帧时原样返回其值；首帧之前取首帧，末帧之后取末帧；
    /// 区间内按前一关键帧的插值方式混合，旋转使用球面插值。
    pub fn sample(&self, frame: f32) -> Option<KeyValue> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;
        if !frame.is_finite() || frame <= first.frame as f32 {
            return Some(first.value);
        }
        if frame >= last.frame as f32 {
            return Some(last.value);
        }

        // 线性扫描：轨道通常很短
        let next_index = self.keyframes.iter().position(|k| k.frame as f32 > frame)?;
        let prev = &self.keyframes[next_index - 1];
        let next = &self.keyframes[next_index];
        if prev.frame as f32 == frame {
            return Some(prev.value);
        }

        let t = (frame - prev.frame as f32) / (next.frame - prev.frame) as f32;
        if prev.interpolation == Interpolation::Step {
            return Some(prev.value);
        }
        Some(interpolate(prev.value, next.value, prev.interpolation.blend(t)))
    }
}

/// 按混合系数插值两个值：向量逐分量线性插值，旋转球面插值
fn interpolate(a: KeyValue, b: KeyValue, s: f32) -> KeyValue {
    match (a, b) {
        (KeyValue::Vec3(a), KeyValue::Vec3(b)) => KeyValue::Vec3(a.lerp(b, s)),
        (KeyValue::Quat(a), KeyValue::Quat(b)) => {
            KeyValue::Quat(normalize_rotation(a).slerp(normalize_rotation(b), s))
        }
        (a, _) => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use std::f32::consts::FRAC_PI_2;

    fn rotation_track(interpolation: Interpolation) -> AnimationTrack {
        let mut track = AnimationTrack::new(BoneId(0), TrackProperty::Rotation);
        track
            .insert_keyframe(Keyframe::new(0, Quat::IDENTITY).with_interpolation(interpolation))
            .unwrap();
        track
            .insert_keyframe(Keyframe::new(10, Quat::from_rotation_y(FRAC_PI_2)).with_interpolation(interpolation))
            .unwrap();
        track
    }

    #[test]
    fn test_slerp_midpoint_not_lerp() {
        let track = rotation_track(Interpolation::Linear);
        let mid = track.sample(5.0).and_then(|v| v.as_quat()).unwrap();
        let slerp_mid = Quat::from_rotation_y(FRAC_PI_2 / 2.0);
        assert!(mid.abs_diff_eq(slerp_mid, 1e-5));

        // 四分之一处 slerp 与 lerp 后归一化明显不同
        let quarter = track.sample(2.5).and_then(|v| v.as_quat()).unwrap();
        let slerp_quarter = Quat::from_rotation_y(FRAC_PI_2 / 4.0);
        let nlerp_quarter = Quat::IDENTITY.lerp(Quat::from_rotation_y(FRAC_PI_2), 0.25).normalize();
        assert!(quarter.abs_diff_eq(slerp_quarter, 1e-5));
        assert!(!quarter.abs_diff_eq(nlerp_quarter, 1e-3));
    }

    #[test]
    fn test_exact_frame_returns_stored_value() {
        for interpolation in [Interpolation::Linear, Interpolation::Bezier, Interpolation::Step] {
            let mut track = AnimationTrack::new(BoneId(1), TrackProperty::Position);
            let values = [Vec3::ZERO, Vec3::new(0.3, 1.7, -2.2), Vec3::new(5.0, 0.0, 1.0)];
            for (i, v) in values.iter().enumerate() {
                track
                    .insert_keyframe(Keyframe::new(i as u32 * 7, *v).with_interpolation(interpolation))
                    .unwrap();
            }
            for (i, v) in values.iter().enumerate() {
                assert_eq!(track.sample(i as f32 * 7.0), Some(KeyValue::Vec3(*v)), "{interpolation:?}");
            }
        }
    }

    #[test]
    fn test_clamp_outside_range() {
        let mut track = AnimationTrack::new(BoneId(0), TrackProperty::Scale);
        track.insert_keyframe(Keyframe::new(5, Vec3::ONE)).unwrap();
        track.insert_keyframe(Keyframe::new(10, Vec3::splat(2.0))).unwrap();
        assert_eq!(track.sample(0.0), Some(KeyValue::Vec3(Vec3::ONE)));
        assert_eq!(track.sample(99.0), Some(KeyValue::Vec3(Vec3::splat(2.0))));
        assert_eq!(AnimationTrack::new(BoneId(0), TrackProperty::Scale).sample(1.0), None);
    }

    #[test]
    fn test_step_and_bezier() {
        let mut track = AnimationTrack::new(BoneId(0), TrackProperty::Position);
        track
            .insert_keyframe(Keyframe::new(0, Vec3::ZERO).with_interpolation(Interpolation::Step))
            .unwrap();
        track.insert_keyframe(Keyframe::new(4, Vec3::X)).unwrap();
        assert_eq!(track.sample(3.9), Some(KeyValue::Vec3(Vec3::ZERO)));

        track
            .insert_keyframe(Keyframe::new(0, Vec3::ZERO).with_interpolation(Interpolation::Bezier))
            .unwrap();
        let v = track.sample(1.0).and_then(|v| v.as_vec3()).unwrap();
        assert!((v.x - 0.15625).abs() < 1e-6);
        assert!(track.needs_dense_bake());
    }

    #[test]
    fn test_insert_keeps_sorted_unique() {
        let mut track = AnimationTrack::new(BoneId(0), TrackProperty::Position);
        for frame in [8, 2, 5, 2] {
            track.insert_keyframe(Keyframe::new(frame, Vec3::splat(frame as f32))).unwrap();
        }
        let frames: Vec<u32> = track.keyframes().iter().map(|k| k.frame).collect();
        assert_eq!(frames, vec![2, 5, 8]);
        assert!(matches!(
            track.insert_keyframe(Keyframe::new(1, Quat::IDENTITY)),
            Err(RigError::KeyframeValueMismatch(TrackProperty::Position))
        ));
    }

    #[test]
    fn test_deserialize_sorts_keyframes() {
        let json = r#"{"boneId": 3, "property": "position", "keyframes": [
            {"frame": 4, "value": [1, 0, 0]}, {"frame": 0, "value": [0, 0, 0]}]}"#;
        let track: AnimationTrack = serde_json::from_str(json).unwrap();
        assert_eq!(track.bone_id, BoneId(3));
        assert_eq!(track.keyframes()[0].frame, 0);
    }
}
