//! 骨骼建议
//!
//! 根据几何分析结果和绑骨类型，生成骨骼层级建议（世界位置 + 父索引 + 名称）。
//! 每种绑骨类型是一个纯函数策略，由 [`RigType`] 选择。

mod generic;
mod humanoid;
mod quadruped;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::geometry::{Aabb, GeometryAnalysis};
use crate::skeleton::{BoneId, Skeleton};
use crate::Result;

/// 绑骨类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RigType {
    /// 通用启发式
    #[default]
    Auto,
    Humanoid,
    Quadruped,
}

/// 单个骨骼建议
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoneSuggestion {
    pub position: Vec3,
    pub name: String,
    /// 父骨骼在同一列表中的索引
    pub parent_index: Option<usize>,
    pub confidence: f32,
}

/// 骨骼建议参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionSettings {
    pub rig_type: RigType,
    /// 骨骼间距（最大尺寸的比例）
    pub spacing_factor: f32,
    pub min_spine_segments: usize,
    pub max_spine_segments: usize,
    pub min_limb_segments: usize,
    pub max_limb_segments: usize,
    /// 末端到中心的最小距离（半对角线的比例），更近的末端被忽略
    pub min_extremity_distance: f32,
    /// 最多生成的肢体链数量
    pub max_limb_chains: usize,
    /// 根骨骼相对中心向下偏移（高度的比例）
    pub root_height_offset: f32,
    /// 方向 Y 分量绝对值超过该值时视为竖直（头 / 尾）
    pub vertical_threshold: f32,
    /// 人形手脚使用检测末端所需的最小横向偏移（横向半宽的比例）
    pub min_lateral_offset: f32,
    /// 位置限制在包围盒外扩该比例（平均尺寸）以内
    pub bounds_margin: f32,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            rig_type: RigType::Auto,
            spacing_factor: 0.15,
            min_spine_segments: 2,
            max_spine_segments: 5,
            min_limb_segments: 2,
            max_limb_segments: 4,
            min_extremity_distance: 0.3,
            max_limb_chains: 6,
            root_height_offset: 0.1,
            vertical_threshold: 0.7,
            min_lateral_offset: 0.2,
            bounds_margin: 0.05,
        }
    }
}

/// 生成骨骼建议；相同输入总是得到相同输出
pub fn suggest_bones(analysis: &GeometryAnalysis, settings: &SuggestionSettings) -> Vec<BoneSuggestion> {
    let suggestions = match settings.rig_type {
        RigType::Auto => generic::suggest(analysis, settings),
        RigType::Humanoid => humanoid::suggest(analysis, settings),
        RigType::Quadruped => quadruped::suggest(analysis, settings),
    };
    log::info!("骨骼建议 ({:?}): {} 个骨骼", settings.rig_type, suggestions.len());
    suggestions
}

/// 把建议转换为骨骼并加入骨架
///
/// 骨骼长度取到第一个子骨骼的距离（叶子取到父骨骼距离的一半），
/// 旋转使本地 +Y 指向第一个子骨骼。
pub fn apply_suggestions(skeleton: &mut Skeleton, suggestions: &[BoneSuggestion]) -> Result<Vec<BoneId>> {
    let mut ids: Vec<BoneId> = Vec::with_capacity(suggestions.len());
    // 建议列表中父索引总是指向更早的条目；否则按根处理
    for (i, s) in suggestions.iter().enumerate() {
        let parent = s.parent_index.filter(|&p| p < i).map(|p| ids[p]);
        let id = skeleton.create_bone(s.name.clone(), s.position, parent)?;
        ids.push(id);
    }

    for (i, s) in suggestions.iter().enumerate() {
        let first_child = suggestions
            .iter()
            .enumerate()
            .find(|(j, c)| c.parent_index == Some(i) && *j > i)
            .map(|(_, c)| c.position);
        let (direction, length) = match first_child {
            Some(child) => ((child - s.position).normalize_or_zero(), s.position.distance(child)),
            None => match s.parent_index.filter(|&p| p < i) {
                Some(p) => {
                    let from_parent = s.position - suggestions[p].position;
                    (from_parent.normalize_or_zero(), from_parent.length() * 0.5)
                }
                None => (Vec3::Y, 0.0),
            },
        };
        let rotation = if direction == Vec3::ZERO {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_arc(Vec3::Y, direction)
        };
        if let Some(bone) = skeleton.get_mut(ids[i]) {
            bone.rotation = rotation;
            bone.length = length;
        }
    }
    Ok(ids)
}

/// 按顺序收集建议，父索引总是指向已加入的条目
#[derive(Default)]
pub(crate) struct SuggestionList {
    items: Vec<BoneSuggestion>,
    bounds: Aabb,
    margin: f32,
}

impl SuggestionList {
    pub(crate) fn new(analysis: &GeometryAnalysis, settings: &SuggestionSettings) -> Self {
        Self {
            items: Vec::new(),
            bounds: analysis.bounds,
            margin: settings.bounds_margin * analysis.bounds.average_size(),
        }
    }

    /// 加入一个骨骼（位置被限制在包围盒 + 边距内），返回其索引
    pub(crate) fn push(&mut self, name: impl Into<String>, position: Vec3, parent: Option<usize>, confidence: f32) -> usize {
        let position = if position.is_finite() {
            self.bounds.clamp_point(position, self.margin)
        } else {
            self.bounds.center()
        };
        self.items.push(BoneSuggestion {
            position,
            name: name.into(),
            parent_index: parent,
            confidence: confidence.clamp(0.0, 1.0),
        });
        self.items.len() - 1
    }

    /// 从 `parent` 出发到 `end` 的等分骨骼链，返回最后一节的索引
    pub(crate) fn push_chain(
        &mut self,
        prefix: &str,
        start: Vec3,
        end: Vec3,
        segments: usize,
        parent: usize,
        confidence: f32,
    ) -> usize {
        let segments = segments.max(1);
        let mut previous = parent;
        for i in 1..=segments {
            let t = i as f32 / segments as f32;
            previous = self.push(format!("{}_{:02}", prefix, i), start.lerp(end, t), Some(previous), confidence);
        }
        previous
    }

    pub(crate) fn position(&self, index: usize) -> Vec3 {
        self.items[index].position
    }

    pub(crate) fn into_vec(self) -> Vec<BoneSuggestion> {
        self.items
    }
}

/// 按间距计算分段数，并限制在 [min, max]
pub(crate) fn segment_count(length: f32, spacing: f32, min: usize, max: usize) -> usize {
    let min = min.max(1);
    let max = max.max(min);
    if !(spacing > f32::EPSILON) || !length.is_finite() {
        return min;
    }
    ((length / spacing).round() as usize).clamp(min, max)
}
