//! 工程文件（JSON）
//!
//! 保存骨架、权重和动画，并记录所引用模型文件的内容哈希，
//! 用于检测模型被替换或损坏。

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::animation::AnimationClip;
use crate::skeleton::{Bone, Skeleton};
use crate::weights::WeightMap;
use crate::{Result, RigError};

/// 当前工程文件版本
pub const PROJECT_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkeletonData {
    pub bones: Vec<Bone>,
}

/// 工程文件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub version: u32,
    pub model_path: String,
    pub model_hash: String,
    pub skeleton: SkeletonData,
    #[serde(default)]
    pub weight_map: WeightMap,
    #[serde(default)]
    pub animations: Vec<AnimationClip>,
}

/// 模型文件内容哈希（blake3，十六进制）
pub fn hash_model_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

impl ProjectFile {
    pub fn new(
        model_path: impl Into<String>,
        model_bytes: &[u8],
        skeleton: &Skeleton,
        weight_map: WeightMap,
        animations: Vec<AnimationClip>,
    ) -> Self {
        Self {
            version: PROJECT_VERSION,
            model_path: model_path.into(),
            model_hash: hash_model_bytes(model_bytes),
            skeleton: SkeletonData {
                bones: skeleton.bones().to_vec(),
            },
            weight_map,
            animations,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let project: ProjectFile = serde_json::from_str(text)?;
        if project.version == 0 || project.version > PROJECT_VERSION {
            return Err(RigError::UnsupportedVersion(project.version));
        }
        for clip in &project.animations {
            clip.validate()?;
        }
        Ok(project)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let project = Self::from_json(&text)?;
        log::info!(
            "加载工程 {}: {} 个骨骼, {} 个动画",
            path.display(),
            project.skeleton.bones.len(),
            project.animations.len()
        );
        Ok(project)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        log::info!("保存工程 {}", path.display());
        Ok(())
    }

    /// 校验模型文件内容与记录的哈希一致
    pub fn verify_model(&self, model_bytes: &[u8]) -> Result<()> {
        let actual = hash_model_bytes(model_bytes);
        if !actual.eq_ignore_ascii_case(&self.model_hash) {
            log::warn!("模型哈希不匹配: {} != {}", self.model_hash, actual);
            return Err(RigError::ModelHashMismatch {
                expected: self.model_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// 重建骨架（重新校验父骨骼存在与无环）
    pub fn to_skeleton(&self) -> Result<Skeleton> {
        Skeleton::from_bones(self.skeleton.bones.clone())
    }
}
