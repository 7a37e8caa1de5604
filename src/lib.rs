//! Rig Engine - 任意网格的自动绑骨与动画运行时
//!
//! 提供以下功能：
//! - 网格几何分析（包围盒、高度剖面、对称轴、末端聚类）
//! - 骨骼建议（通用 / 人形 / 四足）
//! - 顶点权重自动计算（包络 / 热度图 / 最近骨骼）
//! - 骨骼绑定（世界空间 → 父空间转换、蒙皮数据）
//! - 关键帧动画求值、正向运动学传播与导出烘焙

pub mod animation;
pub mod config;
pub mod export;
pub mod geometry;
pub mod model;
pub mod oracle;
pub mod project;
pub mod skeleton;
pub mod skinning;
pub mod suggestion;
pub mod weights;

pub use animation::{AnimationClip, AnimationTrack, Evaluator, Interpolation, Keyframe, KeyValue, Player, RestPose, TrackProperty};
pub use config::RigConfig;
pub use geometry::{analyze, GeometryAnalysis};
pub use model::{EditMode, MeshData, RigEvent, RigModel};
pub use oracle::{OracleError, OracleSession, SuggestionOracle};
pub use project::ProjectFile;
pub use skeleton::{Bone, BoneId, BoneTransform, Skeleton};
pub use skinning::{SkeletonBinder, SkinBinding};
pub use suggestion::{suggest_bones, BoneSuggestion, RigType};
pub use weights::{compute_weights, WeightMap, WeightMethod, WeightSettings};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bone {0} not found")]
    BoneNotFound(BoneId),

    #[error("bone id {0} already exists")]
    DuplicateBoneId(BoneId),

    #[error("bone {0} cannot be its own parent")]
    SelfParent(BoneId),

    #[error("setting parent of bone {bone} to {parent} would create a cycle")]
    CyclicParent { bone: BoneId, parent: BoneId },

    #[error("skeleton has no bones")]
    EmptySkeleton,

    #[error("no mesh loaded")]
    NoMesh,

    #[error("invalid clip: {0}")]
    InvalidClip(String),

    #[error("clip {0} not found")]
    ClipNotFound(String),

    #[error("keyframe value does not match {0:?} track")]
    KeyframeValueMismatch(TrackProperty),

    #[error("model hash mismatch: expected {expected}, got {actual}")]
    ModelHashMismatch { expected: String, actual: String },

    #[error("unsupported project version {0}")]
    UnsupportedVersion(u32),

    #[error("export error: {0}")]
    Export(String),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

pub type Result<T> = std::result::Result<T, RigError>;
