//! 播放器：单片段的时间轴与播放状态
//!
//! - `Stopped`：帧号固定，不推进
//! - `Playing`：每次 tick 推进 `dt × fps × speed` 帧
//! - 到达片段末尾：循环时取模回绕，否则停在末尾并转为 `Stopped`

use serde::{Deserialize, Serialize};

use super::AnimationClip;

/// 播放状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
}

/// 播放配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 播放速度倍率
    pub speed: f32,
    /// 是否循环播放
    pub loop_playback: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_playback: true,
        }
    }
}

/// 播放器
#[derive(Clone, Debug, Default)]
pub struct Player {
    clip_id: Option<String>,
    fps: f32,
    frame_count: u32,
    current_frame: f32,
    state: PlaybackState,
    config: PlayerConfig,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// 设置当前片段，帧号归零并停止
    ///
    /// 返回片段是否变化（变化时需要重新捕获静止姿势）。
    pub fn set_clip(&mut self, clip: Option<&AnimationClip>) -> bool {
        let new_id = clip.map(|c| c.id.clone());
        let changed = new_id != self.clip_id;
        self.clip_id = new_id;
        self.fps = clip.map_or(0.0, |c| c.fps);
        self.frame_count = clip.map_or(0, |c| c.frame_count);
        if changed {
            self.current_frame = 0.0;
            self.state = PlaybackState::Stopped;
        }
        changed
    }

    pub fn clip_id(&self) -> Option<&str> {
        self.clip_id.as_deref()
    }

    /// 开始播放；返回是否发生 Stopped → Playing 转换
    pub fn play(&mut self) -> bool {
        if self.clip_id.is_none() || self.state == PlaybackState::Playing {
            return false;
        }
        if !self.config.loop_playback && self.current_frame >= self.frame_count as f32 {
            self.current_frame = 0.0;
        }
        self.state = PlaybackState::Playing;
        true
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
    }

    /// 跳转到指定帧（拖动时间轴，不影响静止姿势）
    pub fn seek(&mut self, frame: f32) {
        let max = self.frame_count as f32;
        self.current_frame = if frame.is_finite() { frame.clamp(0.0, max) } else { 0.0 };
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.config.speed = if speed.is_finite() { speed.max(0.0) } else { 1.0 };
    }

    pub fn set_loop(&mut self, loop_playback: bool) {
        self.config.loop_playback = loop_playback;
    }

    /// 推进时间；返回是否仍在播放
    pub fn tick(&mut self, delta_time: f32) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        let max_frame = self.frame_count as f32;
        if max_frame <= 0.0 || self.fps <= 0.0 {
            self.state = PlaybackState::Stopped;
            return false;
        }

        self.current_frame += delta_time.max(0.0) * self.fps * self.config.speed;
        if self.current_frame >= max_frame {
            if self.config.loop_playback {
                self.current_frame %= max_frame;
            } else {
                self.current_frame = max_frame;
                self.state = PlaybackState::Stopped;
                log::debug!("片段 {:?} 播放结束", self.clip_id);
            }
        }
        self.state == PlaybackState::Playing
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn current_frame(&self) -> f32 {
        self.current_frame
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}
