//! 动画系统
//!
//! 提供关键帧轨道采样、播放状态机、正向运动学求值和导出烘焙。

pub mod bake;
mod clip;
mod evaluator;
mod keyframe;
mod player;
mod track;

pub use bake::{bake_clip, BakedClip, BakedTrack};
pub use clip::AnimationClip;
pub use evaluator::{evaluate_pose, restore_rest_pose, Evaluator, RestBone, RestPose};
pub use keyframe::{Interpolation, KeyValue, Keyframe, TrackProperty};
pub use player::{PlaybackState, Player, PlayerConfig};
pub use track::AnimationTrack;
