//! 工程文件

mod file;

pub use file::{hash_model_bytes, ProjectFile, SkeletonData, PROJECT_VERSION};
