//! 外部骨骼 / 动画建议服务（可选）
//!
//! 服务返回原始文本，本模块负责宽松提取、严格校验，
//! 并用代际计数保证过期结果不会覆盖更新的编辑。

mod error;
pub mod parse;
mod session;

pub use error::OracleError;
pub use parse::{extract_json, parse_bone_suggestions, parse_keyframes, SuggestedKeyframe};
pub use session::{OracleSession, RequestTicket};

use std::future::Future;

use serde::Serialize;

use crate::geometry::GeometryAnalysis;
use crate::skeleton::Skeleton;
use crate::suggestion::BoneSuggestion;

/// 服务请求
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OracleRequest {
    Bones {
        model_summary: String,
        rule_based_baseline: Vec<BoneSuggestion>,
        free_text_hint: String,
    },
    Animation {
        skeleton_description: String,
        free_text_prompt: String,
    },
}

impl OracleRequest {
    pub fn bones(analysis: &GeometryAnalysis, baseline: Vec<BoneSuggestion>, hint: impl Into<String>) -> Self {
        let c = analysis.center;
        let s = analysis.size;
        let model_summary = format!(
            "center [{:.3}, {:.3}, {:.3}], size [{:.3}, {:.3}, {:.3}], symmetry axis {:?}, {} extremities",
            c.x,
            c.y,
            c.z,
            s.x,
            s.y,
            s.z,
            analysis.symmetry_axis,
            analysis.extremities.len()
        );
        OracleRequest::Bones {
            model_summary,
            rule_based_baseline: baseline,
            free_text_hint: hint.into(),
        }
    }

    pub fn animation(skeleton: &Skeleton, prompt: impl Into<String>) -> Self {
        let skeleton_description = skeleton
            .bones()
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let parent = skeleton
                    .parent_index(i)
                    .and_then(|p| skeleton.bone_at(p))
                    .map_or("-", |p| p.name.as_str());
                format!(
                    "{} (parent {}) at [{:.3}, {:.3}, {:.3}]",
                    b.name, parent, b.position.x, b.position.y, b.position.z
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        OracleRequest::Animation {
            skeleton_description,
            free_text_prompt: prompt.into(),
        }
    }
}

/// 建议服务：返回原始响应文本
pub trait SuggestionOracle: Send + Sync {
    fn request(&self, request: &OracleRequest) -> impl Future<Output = Result<String, OracleError>> + Send;
}

/// 未配置服务时使用
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopOracle;

impl SuggestionOracle for NoopOracle {
    async fn request(&self, _request: &OracleRequest) -> Result<String, OracleError> {
        Err(OracleError::Unavailable)
    }
}
