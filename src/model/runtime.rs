//! 运行时模型：骨架、网格、权重与动画的唯一权威状态
//!
//! 所有修改都经过这里，并以 [`RigEvent`] 通知订阅者。
//! 每帧 [`RigModel::tick`] 的顺序固定为：播放器推进 → 姿势采样与正向运动学 → 绑定器刷新矩阵。

use std::io::Write;
use std::sync::Arc;

use glam::{Quat, Vec3};

use super::MeshData;
use crate::animation::{restore_rest_pose, AnimationClip, Evaluator, Keyframe, Player, TrackProperty};
use crate::config::{get_config, RigConfig};
use crate::export::{build_scene, write_glb};
use crate::geometry::{analyze, analyze_mesh, GeometryAnalysis};
use crate::oracle::{OracleError, OracleRequest, OracleSession, RequestTicket, SuggestedKeyframe};
use crate::project::ProjectFile;
use crate::skeleton::{Bone, BoneId, Skeleton};
use crate::skinning::{resolve_skin, SkeletonBinder, SkinSnapshot};
use crate::suggestion::{apply_suggestions, suggest_bones, BoneSuggestion};
use crate::weights::paint::Brush;
use crate::weights::{build_adjacency, compute_weights, MeshWeights, WeightMap, WeightSettings};
use crate::{Result, RigError};

/// 编辑模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EditMode {
    /// 编辑静止姿势，绑定器停用
    #[default]
    Edit,
    /// 动画模式，绑定器激活
    Animation,
}

/// 状态变化通知
#[derive(Clone, Debug, PartialEq)]
pub enum RigEvent {
    /// 骨骼增删或父子关系变化
    StructureChanged,
    /// 骨骼变换变化（编辑或动画求值）
    TransformChanged,
    WeightsChanged,
    ClipChanged(String),
    ModeChanged(EditMode),
}

type Listener = Box<dyn FnMut(&RigEvent) + Send>;

/// 运行时模型
pub struct RigModel {
    config: RigConfig,
    skeleton: Skeleton,
    mesh: Option<MeshData>,
    weights: WeightMap,
    clips: Vec<AnimationClip>,
    active_clip: Option<String>,
    mode: EditMode,

    // 子系统
    binder: SkeletonBinder,
    evaluator: Evaluator,
    player: Player,
    oracle: OracleSession,

    listeners: Vec<Listener>,
}

impl RigModel {
    pub fn new(config: RigConfig) -> Self {
        Self {
            binder: SkeletonBinder::new(config.weights.clone()),
            player: Player::new(config.player.clone()),
            oracle: OracleSession::new(config.oracle_timeout()),
            config,
            skeleton: Skeleton::new(),
            mesh: None,
            weights: WeightMap::new(),
            clips: Vec::new(),
            active_clip: None,
            mode: EditMode::Edit,
            evaluator: Evaluator::new(),
            listeners: Vec::new(),
        }
    }

    // ========== 访问 ==========

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn mesh(&self) -> Option<&MeshData> {
        self.mesh.as_ref()
    }

    pub fn weight_map(&self) -> &WeightMap {
        &self.weights
    }

    pub fn clips(&self) -> &[AnimationClip] {
        &self.clips
    }

    pub fn clip(&self, id: &str) -> Option<&AnimationClip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub fn active_clip(&self) -> Option<&AnimationClip> {
        self.active_clip.as_deref().and_then(|id| self.clip(id))
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn binder(&self) -> &SkeletonBinder {
        &self.binder
    }

    /// 渲染端读取的蒙皮快照
    pub fn skin_snapshot(&self) -> Arc<SkinSnapshot> {
        self.binder.snapshot()
    }

    /// 建议请求会话（可克隆到异步任务中）
    pub fn oracle_session(&self) -> &OracleSession {
        &self.oracle
    }

    /// 订阅状态变化
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    fn emit(&mut self, event: RigEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    // ========== 网格与分析 ==========

    /// 设置网格；已有权重如果顶点数不符则丢弃
    pub fn set_mesh(&mut self, mesh: MeshData) {
        let stale = self
            .weights
            .get(&mesh.name)
            .is_some_and(|w| !w.covers(mesh.vertex_count()));
        if stale {
            log::warn!("网格 {} 顶点数变化，丢弃已有权重", mesh.name);
            self.weights.remove(&mesh.name);
        }
        log::info!("设置网格 {}: {} 个顶点", mesh.name, mesh.vertex_count());
        self.mesh = Some(mesh);
        self.binder.invalidate();
        self.sync_binder();
        self.emit(RigEvent::WeightsChanged);
    }

    /// 分析当前网格（没有网格时返回退化结果）
    pub fn analyze(&self) -> GeometryAnalysis {
        match &self.mesh {
            Some(mesh) => analyze_mesh(mesh, &self.config.analyzer),
            None => analyze(&[], &self.config.analyzer),
        }
    }

    /// 基于规则的骨骼建议
    pub fn suggest(&self) -> Vec<BoneSuggestion> {
        suggest_bones(&self.analyze(), &self.config.suggestion)
    }

    // ========== 骨骼编辑 ==========

    pub fn add_bone(&mut self, name: impl Into<String>, position: Vec3, parent: Option<BoneId>) -> Result<BoneId> {
        let id = self.skeleton.create_bone(name, position, parent)?;
        self.structure_changed();
        Ok(id)
    }

    /// 删除骨骼：子骨骼挂到其父骨骼，权重索引前移，动画轨道删除
    pub fn remove_bone(&mut self, id: BoneId) -> Result<Bone> {
        let index = self.skeleton.index_of(id).ok_or(RigError::BoneNotFound(id))?;
        let removed = self.skeleton.remove_bone(id)?;
        self.weights.remove_bone_index(index);
        let mut changed_clips = Vec::new();
        for clip in &mut self.clips {
            if clip.remove_bone_tracks(id) > 0 {
                changed_clips.push(clip.id.clone());
            }
        }
        self.structure_changed();
        self.emit(RigEvent::WeightsChanged);
        for clip_id in changed_clips {
            self.emit(RigEvent::ClipChanged(clip_id));
        }
        Ok(removed)
    }

    pub fn set_parent(&mut self, id: BoneId, parent: Option<BoneId>) -> Result<()> {
        self.skeleton.set_parent(id, parent)?;
        self.structure_changed();
        Ok(())
    }

    pub fn rename_bone(&mut self, id: BoneId, name: impl Into<String>) -> Result<()> {
        self.skeleton.rename(id, name)?;
        self.emit(RigEvent::StructureChanged);
        Ok(())
    }

    /// 设置骨骼世界变换
    ///
    /// 编辑模式下修改的是静止姿势；动画模式下修改的是当前姿势（用于打关键帧）。
    pub fn set_bone_transform(&mut self, id: BoneId, position: Vec3, rotation: Quat) -> Result<()> {
        self.skeleton.set_world_transform(id, position, rotation)?;
        self.transform_changed();
        Ok(())
    }

    pub fn set_bone_length(&mut self, id: BoneId, length: f32) -> Result<()> {
        self.skeleton.set_length(id, length)?;
        self.transform_changed();
        Ok(())
    }

    /// 把建议加入骨架；`replace` 时先清空现有骨骼
    ///
    /// 在副本上完成全部修改后再替换，失败时状态不变。
    pub fn apply_suggestions(&mut self, suggestions: &[BoneSuggestion], replace: bool) -> Result<Vec<BoneId>> {
        let mut skeleton = self.skeleton.clone();
        if replace {
            let ids: Vec<BoneId> = skeleton.bones().iter().map(|b| b.id).collect();
            for id in ids {
                skeleton.remove_bone(id)?;
            }
        }
        let ids = apply_suggestions(&mut skeleton, suggestions)?;

        if replace {
            let removed: Vec<BoneId> = self.skeleton.bones().iter().map(|b| b.id).collect();
            for clip in &mut self.clips {
                for id in &removed {
                    clip.remove_bone_tracks(*id);
                }
            }
            self.weights = WeightMap::new();
            self.emit(RigEvent::WeightsChanged);
        }
        self.skeleton = skeleton;
        log::info!("应用 {} 个骨骼建议 (替换: {})", ids.len(), replace);
        self.structure_changed();
        Ok(ids)
    }

    // ========== 权重 ==========

    pub fn set_weight_settings(&mut self, settings: WeightSettings) {
        self.binder.set_settings(settings.clone());
        self.config.weights = settings;
        self.sync_binder();
    }

    /// 自动计算当前网格的权重
    pub fn compute_weights(&mut self) -> Result<()> {
        let mesh = self.mesh.as_ref().ok_or(RigError::NoMesh)?;
        if self.skeleton.is_empty() {
            return Err(RigError::EmptySkeleton);
        }
        // 动画模式下骨架处于动画姿势，权重按静止姿势计算
        let rest = self.rest_skeleton();
        let weights = compute_weights(mesh, rest.bones(), &self.config.weights);
        let name = mesh.name.clone();
        self.weights.insert(name, MeshWeights::new(weights));
        self.weights_changed();
        Ok(())
    }

    /// 在 `center` 处对骨骼绘制一笔，返回被修改的顶点数
    pub fn paint(&mut self, center: Vec3, bone: BoneId, brush: Option<&Brush>) -> Result<usize> {
        let mesh = self.mesh.as_ref().ok_or(RigError::NoMesh)?;
        let bone_index = self.skeleton.index_of(bone).ok_or(RigError::BoneNotFound(bone))?;
        let brush = brush.unwrap_or(&self.config.brush);

        let positions = mesh.world_positions();
        let adjacency = build_adjacency(mesh);
        let vertex_count = mesh.vertex_count();
        let name = mesh.name.clone();

        let mut weights = self
            .weights
            .get(&name)
            .filter(|w| w.covers(vertex_count))
            .cloned()
            .unwrap_or_else(|| MeshWeights::new(vec![Vec::new(); vertex_count]));
        let changed = brush.stroke(center, bone_index, &positions, &adjacency, &mut weights.vertex_weights);
        if changed > 0 {
            self.weights.insert(name, weights);
            self.weights_changed();
        }
        Ok(changed)
    }

    // ========== 动画片段 ==========

    /// 添加片段（同 id 的片段被替换）
    pub fn add_clip(&mut self, clip: AnimationClip) -> Result<()> {
        clip.validate()?;
        let id = clip.id.clone();
        match self.clips.iter_mut().find(|c| c.id == id) {
            Some(existing) => *existing = clip,
            None => self.clips.push(clip),
        }
        self.emit(RigEvent::ClipChanged(id));
        Ok(())
    }

    pub fn remove_clip(&mut self, id: &str) -> Option<AnimationClip> {
        let index = self.clips.iter().position(|c| c.id == id)?;
        if self.active_clip.as_deref() == Some(id) {
            self.player.set_clip(None);
            self.active_clip = None;
            if let Some(rest) = self.evaluator.rest_pose() {
                restore_rest_pose(rest, &mut self.skeleton);
            }
        }
        let clip = self.clips.remove(index);
        self.emit(RigEvent::ClipChanged(clip.id.clone()));
        Some(clip)
    }

    /// 切换当前片段
    pub fn set_active_clip(&mut self, id: Option<&str>) -> Result<()> {
        if let Some(id) = id {
            if self.clip(id).is_none() {
                return Err(RigError::ClipNotFound(id.to_string()));
            }
        }
        if self.active_clip.as_deref() == id {
            return Ok(());
        }
        // 切换前回到静止姿势，避免把上一个片段的姿势当作新的静止姿势
        if self.mode == EditMode::Animation {
            self.evaluator.reset(&mut self.skeleton);
        }
        self.active_clip = id.map(str::to_string);
        let clip = self.active_clip.as_deref().and_then(|id| self.clips.iter().find(|c| c.id == id));
        self.player.set_clip(clip);
        if let (EditMode::Animation, Some(clip_id)) = (self.mode, id) {
            self.evaluator.prepare(&self.skeleton, clip_id, false);
            self.evaluate_current()?;
        }
        self.emit(RigEvent::ClipChanged(id.unwrap_or_default().to_string()));
        Ok(())
    }

    /// 设置关键帧（骨骼必须存在）
    pub fn set_keyframe(&mut self, clip_id: &str, bone: BoneId, property: TrackProperty, keyframe: Keyframe) -> Result<()> {
        if self.skeleton.get(bone).is_none() {
            return Err(RigError::BoneNotFound(bone));
        }
        let clip = self
            .clips
            .iter_mut()
            .find(|c| c.id == clip_id)
            .ok_or_else(|| RigError::ClipNotFound(clip_id.to_string()))?;
        clip.set_keyframe(bone, property, keyframe)?;
        self.clip_edited(clip_id)
    }

    /// 移除关键帧；轨道空了会被删除
    pub fn remove_keyframe(
        &mut self,
        clip_id: &str,
        bone: BoneId,
        property: TrackProperty,
        frame: u32,
    ) -> Result<Option<Keyframe>> {
        let clip = self
            .clips
            .iter_mut()
            .find(|c| c.id == clip_id)
            .ok_or_else(|| RigError::ClipNotFound(clip_id.to_string()))?;
        let removed = clip.remove_keyframe(bone, property, frame);
        if removed.is_some() {
            self.clip_edited(clip_id)?;
        }
        Ok(removed)
    }

    // ========== 模式与播放 ==========

    /// 切换编辑模式
    ///
    /// 进入动画模式激活绑定器并捕获静止姿势；回到编辑模式恢复静止姿势并拆除绑定。
    pub fn set_mode(&mut self, mode: EditMode) -> Result<()> {
        if self.mode == mode {
            return Ok(());
        }
        match mode {
            EditMode::Animation => {
                let mesh = self.mesh.as_ref().ok_or(RigError::NoMesh)?;
                self.binder.activate(&self.skeleton, mesh, self.weights.get(&mesh.name))?;
                self.evaluator.capture_rest(&self.skeleton, self.active_clip.as_deref());
                self.mode = EditMode::Animation;
                self.evaluate_current()?;
            }
            EditMode::Edit => {
                self.player.stop();
                self.evaluator.reset(&mut self.skeleton);
                self.evaluator.invalidate_rest();
                self.binder.deactivate();
                self.mode = EditMode::Edit;
                self.emit(RigEvent::TransformChanged);
            }
        }
        log::info!("切换到 {:?} 模式", mode);
        self.emit(RigEvent::ModeChanged(mode));
        Ok(())
    }

    /// 开始播放（必要时先进入动画模式）
    pub fn play(&mut self) -> Result<()> {
        if self.active_clip.is_none() {
            return Ok(());
        }
        self.set_mode(EditMode::Animation)?;
        if self.player.play() {
            if let Some(clip_id) = self.active_clip.as_deref() {
                self.evaluator.reset(&mut self.skeleton);
                self.evaluator.prepare(&self.skeleton, clip_id, true);
            }
            self.evaluate_current()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.player.stop();
    }

    /// 拖动时间轴：只重新求值，不重新捕获静止姿势
    pub fn seek(&mut self, frame: f32) -> Result<()> {
        self.player.seek(frame);
        if self.mode == EditMode::Animation {
            self.evaluate_current()?;
        }
        Ok(())
    }

    /// 每帧更新
    pub fn tick(&mut self, delta_time: f32) -> Result<()> {
        if self.mode != EditMode::Animation {
            return Ok(());
        }
        if self.player.is_playing() {
            self.player.tick(delta_time);
            self.evaluate_current()?;
        }
        Ok(())
    }

    // ========== 建议服务 ==========

    /// 骨骼建议请求（附带规则建议作为基线）
    pub fn bone_request(&self, hint: impl Into<String>) -> OracleRequest {
        let analysis = self.analyze();
        let baseline = suggest_bones(&analysis, &self.config.suggestion);
        OracleRequest::bones(&analysis, baseline, hint)
    }

    pub fn animation_request(&self, prompt: impl Into<String>) -> OracleRequest {
        OracleRequest::animation(&self.skeleton, prompt)
    }

    /// 提交服务返回的骨骼；凭据过期时拒绝
    pub fn apply_oracle_bones(
        &mut self,
        ticket: &RequestTicket,
        suggestions: &[BoneSuggestion],
        replace: bool,
    ) -> Result<Vec<BoneId>> {
        if !self.oracle.is_current(ticket) {
            log::warn!("丢弃过期的骨骼建议 (代际 {})", ticket.generation());
            return Err(OracleError::Cancelled.into());
        }
        self.apply_suggestions(suggestions, replace)
    }

    /// 提交服务返回的关键帧；全部成功才替换片段
    pub fn apply_oracle_keyframes(
        &mut self,
        ticket: &RequestTicket,
        clip_id: &str,
        keyframes: &[SuggestedKeyframe],
    ) -> Result<usize> {
        if !self.oracle.is_current(ticket) {
            log::warn!("丢弃过期的关键帧建议 (代际 {})", ticket.generation());
            return Err(OracleError::Cancelled.into());
        }
        let index = self
            .clips
            .iter()
            .position(|c| c.id == clip_id)
            .ok_or_else(|| RigError::ClipNotFound(clip_id.to_string()))?;

        let mut clip = self.clips[index].clone();
        for key in keyframes {
            if self.skeleton.get(key.bone_id).is_none() {
                return Err(RigError::BoneNotFound(key.bone_id));
            }
            clip.set_keyframe(key.bone_id, key.property, key.keyframe)?;
        }
        self.clips[index] = clip;
        self.clip_edited(clip_id)?;
        Ok(keyframes.len())
    }

    // ========== 工程与导出 ==========

    /// 生成工程文件（骨架取静止姿势）
    pub fn to_project(&self, model_path: impl Into<String>, model_bytes: &[u8]) -> ProjectFile {
        let skeleton = self.rest_skeleton();
        ProjectFile::new(model_path, model_bytes, &skeleton, self.weights.clone(), self.clips.clone())
    }

    /// 载入工程；提供模型内容时先校验哈希
    pub fn load_project(&mut self, project: &ProjectFile, model_bytes: Option<&[u8]>) -> Result<()> {
        if let Some(bytes) = model_bytes {
            project.verify_model(bytes)?;
        }
        let skeleton = project.to_skeleton()?;

        self.set_mode(EditMode::Edit)?;
        self.player.set_clip(None);
        self.active_clip = None;
        self.skeleton = skeleton;
        self.weights = project.weight_map.clone();
        self.clips = project.animations.clone();
        self.structure_changed();
        self.emit(RigEvent::WeightsChanged);
        let clip_ids: Vec<String> = self.clips.iter().map(|c| c.id.clone()).collect();
        for id in clip_ids {
            self.emit(RigEvent::ClipChanged(id));
        }
        Ok(())
    }

    /// 导出 glTF 二进制（骨架取静止姿势，全部片段烘焙）
    pub fn export_glb<W: Write>(&self, writer: W) -> Result<()> {
        let mesh = self.mesh.as_ref().ok_or(RigError::NoMesh)?;
        let skeleton = self.rest_skeleton();
        let skin = resolve_skin(mesh, &skeleton, self.weights.get(&mesh.name), &self.config.weights);
        let scene = build_scene(&skeleton, mesh, &skin, &self.clips)?;
        write_glb(&scene, writer)?;
        log::info!("导出 {}: {} 个关节, {} 个片段", mesh.name, scene.joints.len(), scene.clips.len());
        Ok(())
    }

    // ========== 内部 ==========

    fn rest_skeleton(&self) -> Skeleton {
        let mut skeleton = self.skeleton.clone();
        if self.mode == EditMode::Animation {
            if let Some(rest) = self.evaluator.rest_pose() {
                restore_rest_pose(rest, &mut skeleton);
            }
        }
        skeleton
    }

    fn structure_changed(&mut self) {
        // 结构变化后进行中的建议请求作废
        self.oracle.cancel();
        if self.mode == EditMode::Edit {
            self.evaluator.invalidate_rest();
        }
        self.sync_binder();
        self.emit(RigEvent::StructureChanged);
    }

    fn transform_changed(&mut self) {
        if self.mode == EditMode::Edit {
            self.evaluator.invalidate_rest();
        }
        self.sync_binder();
        self.emit(RigEvent::TransformChanged);
    }

    fn weights_changed(&mut self) {
        self.binder.invalidate();
        self.sync_binder();
        self.emit(RigEvent::WeightsChanged);
    }

    /// 编辑了片段；当前片段在动画模式下立即重新求值
    fn clip_edited(&mut self, clip_id: &str) -> Result<()> {
        if self.mode == EditMode::Animation && self.active_clip.as_deref() == Some(clip_id) {
            self.evaluate_current()?;
        }
        self.emit(RigEvent::ClipChanged(clip_id.to_string()));
        Ok(())
    }

    /// 在当前帧求值并刷新绑定
    fn evaluate_current(&mut self) -> Result<()> {
        let frame = self.player.current_frame();
        let Some(clip) = self.active_clip.as_deref().and_then(|id| self.clips.iter().find(|c| c.id == id)) else {
            return Ok(());
        };
        self.evaluator.apply(clip, frame, &mut self.skeleton);
        self.update_binder()?;
        self.emit(RigEvent::TransformChanged);
        Ok(())
    }

    /// 刷新绑定器；需要重新绑定时以静止姿势为绑定姿势
    fn update_binder(&mut self) -> Result<()> {
        let Some(mesh) = &self.mesh else {
            return Ok(());
        };
        let rest = (self.mode == EditMode::Animation && self.binder.needs_rebuild(&self.skeleton))
            .then(|| self.rest_skeleton());
        let stored = self.weights.get(&mesh.name);
        self.binder
            .update_with_rest(&self.skeleton, rest.as_ref().unwrap_or(&self.skeleton), mesh, stored)?;
        Ok(())
    }

    /// 绑定器激活时按当前骨架刷新；骨架变空时退回编辑模式
    fn sync_binder(&mut self) {
        if !self.binder.is_active() {
            return;
        }
        if let Err(e) = self.update_binder() {
            log::warn!("绑定失败，退回编辑模式: {}", e);
            self.player.stop();
            self.evaluator.invalidate_rest();
            self.binder.deactivate();
            self.mode = EditMode::Edit;
            self.emit(RigEvent::ModeChanged(EditMode::Edit));
        }
    }
}

impl Default for RigModel {
    /// 使用全局配置
    fn default() -> Self {
        Self::new(get_config())
    }
}
