//! 动画关键帧

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::skeleton::normalize_rotation;

/// 插值方式（作用于以该关键帧开始的区间）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    /// smoothstep 缓动
    Bezier,
    Step,
}

impl Interpolation {
    /// 区间内归一化时间 `t` 的混合系数
    pub fn blend(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Interpolation::Linear => t,
            Interpolation::Bezier => t * t * (3.0 - 2.0 * t),
            Interpolation::Step => 0.0,
        }
    }

    /// 导出目标只支持线性插值，其余方式需要逐帧烘焙
    pub fn needs_dense_bake(self) -> bool {
        !matches!(self, Interpolation::Linear)
    }
}

/// 轨道属性
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackProperty {
    Position,
    Rotation,
    Scale,
}

impl TrackProperty {
    /// 导出轨道名后缀
    pub fn export_suffix(self) -> &'static str {
        match self {
            TrackProperty::Position => "position",
            TrackProperty::Rotation => "quaternion",
            TrackProperty::Scale => "scale",
        }
    }

    /// 值分量个数
    pub fn components(self) -> usize {
        match self {
            TrackProperty::Rotation => 4,
            _ => 3,
        }
    }
}

/// 关键帧值：位置 / 缩放为 3 个分量，旋转为 4 个分量 `[x, y, z, w]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub enum KeyValue {
    Vec3(Vec3),
    Quat(Quat),
}

impl KeyValue {
    pub fn matches(&self, property: TrackProperty) -> bool {
        matches!(
            (self, property),
            (KeyValue::Vec3(_), TrackProperty::Position | TrackProperty::Scale)
                | (KeyValue::Quat(_), TrackProperty::Rotation)
        )
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            KeyValue::Vec3(v) => Some(*v),
            KeyValue::Quat(_) => None,
        }
    }

    /// 旋转值（读取时重新归一化）
    pub fn as_quat(&self) -> Option<Quat> {
        match self {
            KeyValue::Quat(q) => Some(normalize_rotation(*q)),
            KeyValue::Vec3(_) => None,
        }
    }

    pub fn to_vec(self) -> Vec<f32> {
        self.into()
    }
}

impl TryFrom<Vec<f32>> for KeyValue {
    type Error = String;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err("keyframe value contains non-finite number".to_string());
        }
        match values.as_slice() {
            [x, y, z] => Ok(KeyValue::Vec3(Vec3::new(*x, *y, *z))),
            [x, y, z, w] => Ok(KeyValue::Quat(Quat::from_xyzw(*x, *y, *z, *w))),
            other => Err(format!("keyframe value must have 3 or 4 components, got {}", other.len())),
        }
    }
}

impl From<KeyValue> for Vec<f32> {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Vec3(v) => v.to_array().to_vec(),
            KeyValue::Quat(q) => q.to_array().to_vec(),
        }
    }
}

impl From<Vec3> for KeyValue {
    fn from(v: Vec3) -> Self {
        KeyValue::Vec3(v)
    }
}

impl From<Quat> for KeyValue {
    fn from(q: Quat) -> Self {
        KeyValue::Quat(q)
    }
}

/// 关键帧
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub frame: u32,
    pub value: KeyValue,
    #[serde(default)]
    pub interpolation: Interpolation,
}

impl Keyframe {
    pub fn new(frame: u32, value: impl Into<KeyValue>) -> Self {
        Self {
            frame,
            value: value.into(),
            interpolation: Interpolation::Linear,
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_curves() {
        assert_eq!(Interpolation::Linear.blend(0.25), 0.25);
        assert_eq!(Interpolation::Step.blend(0.9), 0.0);
        assert!((Interpolation::Bezier.blend(0.5) - 0.5).abs() < 1e-6);
        assert!((Interpolation::Bezier.blend(0.25) - 0.15625).abs() < 1e-6);
    }

    #[test]
    fn test_keyframe_json_shape() {
        let json = r#"{"frame": 10, "value": [0, 0.7071068, 0, 0.7071068], "interpolation": "bezier"}"#;
        let kf: Keyframe = serde_json::from_str(json).unwrap();
        assert_eq!(kf.frame, 10);
        assert!(kf.value.matches(TrackProperty::Rotation));
        assert_eq!(kf.interpolation, Interpolation::Bezier);

        let kf: Keyframe = serde_json::from_str(r#"{"frame": 0, "value": [1, 2, 3]}"#).unwrap();
        assert_eq!(kf.value, KeyValue::Vec3(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(kf.interpolation, Interpolation::Linear);
        assert_eq!(serde_json::to_value(kf).unwrap()["value"], serde_json::json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_bad_value_length_rejected() {
        assert!(serde_json::from_str::<Keyframe>(r#"{"frame": 0, "value": [1, 2]}"#).is_err());
        assert!(KeyValue::try_from(vec![f32::NAN, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_rotation_renormalized_on_read() {
        let value = KeyValue::Quat(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0));
        assert_eq!(value.as_quat(), Some(Quat::IDENTITY));
    }
}
