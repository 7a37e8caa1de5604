//! glTF 2.0 二进制容器（GLB）写出
//!
//! 结构：12 字节文件头 + JSON 块 + BIN 块，每块 4 字节对齐。

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use glam::Vec3;
use serde_json::{json, Value};

use super::ExportScene;
use crate::animation::TrackProperty;
use crate::Result;

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const FLOAT: u32 = 5126;
const UNSIGNED_SHORT: u32 = 5123;
const UNSIGNED_INT: u32 = 5125;
const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;

/// 二进制缓冲区与对应的 bufferView / accessor
#[derive(Default)]
struct BufferBuilder {
    data: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferBuilder {
    fn align(&mut self) {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
    }

    fn push_view(&mut self, offset: usize, target: Option<u32>) -> usize {
        let mut view = json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": self.data.len() - offset,
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.views.push(view);
        self.views.len() - 1
    }

    fn push_accessor(&mut self, accessor: Value) -> usize {
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    /// 写入 f32 数据，返回 accessor 索引
    fn floats(
        &mut self,
        values: &[f32],
        kind: &str,
        count: usize,
        target: Option<u32>,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
    ) -> Result<usize> {
        self.align();
        let offset = self.data.len();
        for &v in values {
            self.data.write_f32::<LittleEndian>(v)?;
        }
        let view = self.push_view(offset, target);
        let mut accessor = json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": count,
            "type": kind,
        });
        if let Some((min, max)) = bounds {
            accessor["min"] = json!(min);
            accessor["max"] = json!(max);
        }
        Ok(self.push_accessor(accessor))
    }

    fn u16s(&mut self, values: &[u16], kind: &str, count: usize) -> Result<usize> {
        self.align();
        let offset = self.data.len();
        for &v in values {
            self.data.write_u16::<LittleEndian>(v)?;
        }
        let view = self.push_view(offset, Some(ARRAY_BUFFER));
        Ok(self.push_accessor(json!({
            "bufferView": view,
            "componentType": UNSIGNED_SHORT,
            "count": count,
            "type": kind,
        })))
    }

    fn u32s(&mut self, values: &[u32]) -> Result<usize> {
        self.align();
        let offset = self.data.len();
        for &v in values {
            self.data.write_u32::<LittleEndian>(v)?;
        }
        let view = self.push_view(offset, Some(ELEMENT_ARRAY_BUFFER));
        Ok(self.push_accessor(json!({
            "bufferView": view,
            "componentType": UNSIGNED_INT,
            "count": values.len(),
            "type": "SCALAR",
        })))
    }
}

fn vec3_bounds(points: &[Vec3]) -> Option<(Vec<f32>, Vec<f32>)> {
    let first = *points.first()?;
    let (min, max) = points
        .iter()
        .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
    Some((min.to_array().to_vec(), max.to_array().to_vec()))
}

fn flatten(points: &[Vec3]) -> Vec<f32> {
    points.iter().flat_map(|p| p.to_array()).collect()
}

/// 构建 glTF JSON 与 BIN 数据
fn build_document(scene: &ExportScene) -> Result<(Value, Vec<u8>)> {
    let mut buffers = BufferBuilder::default();
    let joint_count = scene.joints.len();
    let vertex_count = scene.mesh.positions.len();

    // 节点 0..n 为关节，节点 n 为网格
    let mut nodes: Vec<Value> = scene
        .joints
        .iter()
        .map(|j| {
            let mut node = json!({
                "name": j.name,
                "translation": j.translation.to_array(),
                "rotation": j.rotation.to_array(),
                "scale": j.scale.to_array(),
            });
            if !j.children.is_empty() {
                node["children"] = json!(j.children);
            }
            node
        })
        .collect();

    let position = buffers.floats(
        &flatten(&scene.mesh.positions),
        "VEC3",
        vertex_count,
        Some(ARRAY_BUFFER),
        vec3_bounds(&scene.mesh.positions),
    )?;
    let mut attributes = json!({ "POSITION": position });
    if scene.mesh.normals.len() == vertex_count && vertex_count > 0 {
        let normal = buffers.floats(&flatten(&scene.mesh.normals), "VEC3", vertex_count, Some(ARRAY_BUFFER), None)?;
        attributes["NORMAL"] = json!(normal);
    }
    let joints_flat: Vec<u16> = scene.skin.indices.iter().flatten().copied().collect();
    let weights_flat: Vec<f32> = scene.skin.weights.iter().flatten().copied().collect();
    attributes["JOINTS_0"] = json!(buffers.u16s(&joints_flat, "VEC4", scene.skin.vertex_count())?);
    attributes["WEIGHTS_0"] = json!(buffers.floats(
        &weights_flat,
        "VEC4",
        scene.skin.vertex_count(),
        Some(ARRAY_BUFFER),
        None
    )?);

    let mut primitive = json!({ "attributes": attributes, "mode": 4 });
    if !scene.mesh.indices.is_empty() {
        primitive["indices"] = json!(buffers.u32s(&scene.mesh.indices)?);
    }

    let ibm: Vec<f32> = scene
        .joints
        .iter()
        .flat_map(|j| j.inverse_bind.to_cols_array())
        .collect();
    let ibm_accessor = buffers.floats(&ibm, "MAT4", joint_count, None, None)?;

    let mesh_node = joint_count;
    nodes.push(json!({ "name": scene.mesh.name, "mesh": 0, "skin": 0 }));

    let mut animations = Vec::with_capacity(scene.clips.len());
    for clip in &scene.clips {
        let mut samplers = Vec::new();
        let mut channels = Vec::new();
        for track in clip.tracks.iter().filter(|t| !t.times.is_empty()) {
            let (min, max) = track
                .times
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), t| (lo.min(*t), hi.max(*t)));
            let input = buffers.floats(&track.times, "SCALAR", track.times.len(), None, Some((vec![min], vec![max])))?;
            let (kind, path) = match track.property {
                TrackProperty::Position => ("VEC3", "translation"),
                TrackProperty::Rotation => ("VEC4", "rotation"),
                TrackProperty::Scale => ("VEC3", "scale"),
            };
            let output = buffers.floats(&track.values, kind, track.times.len(), None, None)?;
            samplers.push(json!({ "input": input, "output": output, "interpolation": "LINEAR" }));
            channels.push(json!({
                "sampler": samplers.len() - 1,
                "target": { "node": track.bone_index, "path": path },
                "extras": { "name": track.name() },
            }));
        }
        animations.push(json!({ "name": clip.name, "samplers": samplers, "channels": channels }));
    }
    buffers.align();

    let mut document = json!({
        "asset": { "version": "2.0", "generator": concat!("rig_engine ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": [scene.root, mesh_node] }],
        "nodes": nodes,
        "meshes": [{ "name": scene.mesh.name, "primitives": [primitive] }],
        "skins": [{
            "inverseBindMatrices": ibm_accessor,
            "joints": (0..joint_count).collect::<Vec<_>>(),
            "skeleton": scene.root,
        }],
        "accessors": buffers.accessors,
        "bufferViews": buffers.views,
        "buffers": [{ "byteLength": buffers.data.len() }],
    });
    if !animations.is_empty() {
        document["animations"] = json!(animations);
    }
    Ok((document, buffers.data))
}

/// 写出 GLB
pub fn write_glb<W: Write>(scene: &ExportScene, mut writer: W) -> Result<()> {
    let (document, bin) = build_document(scene)?;
    let mut json_bytes = serde_json::to_vec(&document)?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total_length = 12 + 8 + json_bytes.len() + 8 + bin.len();
    writer.write_u32::<LittleEndian>(GLB_MAGIC)?;
    writer.write_u32::<LittleEndian>(GLB_VERSION)?;
    writer.write_u32::<LittleEndian>(total_length as u32)?;

    writer.write_u32::<LittleEndian>(json_bytes.len() as u32)?;
    writer.write_u32::<LittleEndian>(CHUNK_JSON)?;
    writer.write_all(&json_bytes)?;

    writer.write_u32::<LittleEndian>(bin.len() as u32)?;
    writer.write_u32::<LittleEndian>(CHUNK_BIN)?;
    writer.write_all(&bin)?;

    log::info!(
        "导出 GLB: {} 个关节, {} 个顶点, {} 个动画, {} 字节",
        scene.joints.len(),
        scene.mesh.positions.len(),
        scene.clips.len(),
        total_length
    );
    Ok(())
}

/// 写出 GLB 到内存
pub fn to_glb_bytes(scene: &ExportScene) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    write_glb(scene, &mut bytes)?;
    Ok(bytes)
}
