//! 引擎配置
//!
//! 默认值直接写在代码里；也可以从 JSON 读取（缺失字段使用默认值）。
//! 进程内有一份全局配置，`RigModel::default()` 从这里取初值。

use std::fs;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::animation::PlayerConfig;
use crate::geometry::AnalyzerSettings;
use crate::suggestion::SuggestionSettings;
use crate::weights::paint::Brush;
use crate::weights::WeightSettings;
use crate::Result;

/// 引擎配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RigConfig {
    // ========== 分析与建议 ==========
    pub analyzer: AnalyzerSettings,
    pub suggestion: SuggestionSettings,

    // ========== 权重 ==========
    /// 自动权重参数（同时决定绑定缓存的设置哈希）
    pub weights: WeightSettings,
    pub brush: Brush,

    // ========== 播放 ==========
    pub player: PlayerConfig,

    // ========== 建议服务 ==========
    /// 请求超时（秒），默认 300
    pub oracle_timeout_secs: f32,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerSettings::default(),
            suggestion: SuggestionSettings::default(),
            weights: WeightSettings::default(),
            brush: Brush::default(),
            player: PlayerConfig::default(),
            oracle_timeout_secs: 300.0,
        }
    }
}

impl RigConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_json(&fs::read_to_string(path)?)?;
        log::info!("加载配置 {}", path.display());
        Ok(config)
    }

    /// 建议服务超时；非法值回退到默认 300 秒
    pub fn oracle_timeout(&self) -> Duration {
        if self.oracle_timeout_secs.is_finite() && self.oracle_timeout_secs > 0.0 {
            Duration::from_secs_f32(self.oracle_timeout_secs)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// 全局配置实例
static RIG_CONFIG: Lazy<RwLock<RigConfig>> = Lazy::new(|| RwLock::new(RigConfig::default()));

/// 获取当前配置（只读副本）
pub fn get_config() -> RigConfig {
    RIG_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 替换全局配置
pub fn set_config(config: RigConfig) {
    *RIG_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(RigConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::WeightMethod;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RigConfig::from_json(
            r#"{"weights": {"method": "heatmap", "smooth_iterations": 2}, "oracleTimeoutSecs": 12}"#,
        )
        .unwrap();
        assert_eq!(config.weights.method, WeightMethod::Heatmap);
        assert_eq!(config.weights.smooth_iterations, 2);
        assert_eq!(config.weights.falloff, WeightSettings::default().falloff);
        assert_eq!(config.player, PlayerConfig::default());
        assert_eq!(config.oracle_timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let config = RigConfig {
            oracle_timeout_secs: -1.0,
            ..Default::default()
        };
        assert_eq!(config.oracle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        fs::write(&path, r#"{"player": {"speed": 2.0}}"#).unwrap();
        let config = RigConfig::load(&path).unwrap();
        assert_eq!(config.player.speed, 2.0);
        assert!(config.player.loop_playback);
    }

    #[test]
    fn test_global_set_and_reset() {
        let mut custom = RigConfig::default();
        custom.brush.radius = 0.25;
        set_config(custom.clone());
        assert_eq!(get_config().brush.radius, 0.25);
        reset_config();
        assert_eq!(get_config(), RigConfig::default());
    }
}
