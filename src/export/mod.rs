//! 导出：骨骼层级 + 蒙皮数据 + 烘焙动画 → glTF 2.0 二进制容器

pub mod glb;
mod scene;

pub use glb::{to_glb_bytes, write_glb};
pub use scene::{build_scene, ExportJoint, ExportMesh, ExportScene};
