//! 骨架管理器
//!
//! 按插入顺序保存骨骼；绑定时的蒙皮索引由该顺序推导。
//! 所有修改父子关系的操作都在修改生效前做祖先检查，层级永远保持为森林。

use std::collections::{HashMap, VecDeque};

use glam::{Quat, Vec3};

use super::{Bone, BoneId, BoneTransform};
use crate::{Result, RigError};

/// 骨架
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    bones: Vec<Bone>,
    id_to_index: HashMap<BoneId, usize>,
    next_id: u32,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从扁平骨骼列表构建（读取工程文件时使用），校验 id 唯一、父骨骼存在且无环
    pub fn from_bones(bones: Vec<Bone>) -> Result<Self> {
        let mut skeleton = Self::new();
        for (index, bone) in bones.iter().enumerate() {
            if skeleton.id_to_index.insert(bone.id, index).is_some() {
                return Err(RigError::DuplicateBoneId(bone.id));
            }
            skeleton.next_id = skeleton.next_id.max(bone.id.0.saturating_add(1));
        }
        skeleton.bones = bones;

        for bone in &skeleton.bones {
            match bone.parent_id {
                Some(parent) if parent == bone.id => return Err(RigError::SelfParent(bone.id)),
                Some(parent) if !skeleton.id_to_index.contains_key(&parent) => {
                    return Err(RigError::BoneNotFound(parent))
                }
                _ => {}
            }
        }

        // 沿父链向上走，步数超过骨骼数量即存在环
        for bone in &skeleton.bones {
            let mut current = bone.parent_id;
            let mut steps = 0;
            while let Some(id) = current {
                steps += 1;
                if steps > skeleton.bones.len() {
                    return Err(RigError::CyclicParent {
                        bone: bone.id,
                        parent: bone.parent_id.unwrap_or(bone.id),
                    });
                }
                current = skeleton.get(id).and_then(|b| b.parent_id);
            }
        }
        Ok(skeleton)
    }

    /// 新建骨骼并分配 id
    pub fn create_bone(&mut self, name: impl Into<String>, position: Vec3, parent: Option<BoneId>) -> Result<BoneId> {
        let id = BoneId(self.next_id);
        self.add_bone(Bone::new(id, name, position).with_parent(parent))
    }

    /// 添加骨骼（保留其 id）
    ///
    /// 新骨骼没有子骨骼，因此只需校验父骨骼存在即可保证无环。
    pub fn add_bone(&mut self, bone: Bone) -> Result<BoneId> {
        if self.id_to_index.contains_key(&bone.id) {
            return Err(RigError::DuplicateBoneId(bone.id));
        }
        if let Some(parent) = bone.parent_id {
            if parent == bone.id {
                return Err(RigError::SelfParent(bone.id));
            }
            if !self.id_to_index.contains_key(&parent) {
                return Err(RigError::BoneNotFound(parent));
            }
        }
        let id = bone.id;
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        self.id_to_index.insert(id, self.bones.len());
        self.bones.push(bone);
        Ok(id)
    }

    /// 删除骨骼，其子骨骼挂到被删除骨骼的父骨骼上
    pub fn remove_bone(&mut self, id: BoneId) -> Result<Bone> {
        let index = self.index_of(id).ok_or(RigError::BoneNotFound(id))?;
        let grand_parent = self.bones[index].parent_id;
        for bone in &mut self.bones {
            if bone.parent_id == Some(id) {
                bone.parent_id = grand_parent;
            }
        }
        let removed = self.bones.remove(index);
        self.rebuild_index();
        log::debug!("删除骨骼 {} ({}), 子骨骼重新挂接到 {:?}", removed.name, id, grand_parent);
        Ok(removed)
    }

    /// 设置父骨骼
    ///
    /// 拒绝：自身为父、父骨骼不存在、父骨骼是自身后代（会形成环）。
    pub fn set_parent(&mut self, id: BoneId, parent: Option<BoneId>) -> Result<()> {
        let index = self.index_of(id).ok_or(RigError::BoneNotFound(id))?;
        if let Some(parent_id) = parent {
            if parent_id == id {
                return Err(RigError::SelfParent(id));
            }
            if !self.id_to_index.contains_key(&parent_id) {
                return Err(RigError::BoneNotFound(parent_id));
            }
            if self.is_ancestor(id, parent_id) {
                return Err(RigError::CyclicParent { bone: id, parent: parent_id });
            }
        }
        self.bones[index].parent_id = parent;
        Ok(())
    }

    /// `ancestor` 是否为 `bone` 的祖先
    pub fn is_ancestor(&self, ancestor: BoneId, bone: BoneId) -> bool {
        let mut current = self.get(bone).and_then(|b| b.parent_id);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.bones.len() {
                break;
            }
            current = self.get(id).and_then(|b| b.parent_id);
        }
        false
    }

    pub fn rename(&mut self, id: BoneId, name: impl Into<String>) -> Result<()> {
        let bone = self.get_mut(id).ok_or(RigError::BoneNotFound(id))?;
        bone.name = name.into();
        Ok(())
    }

    /// 设置世界空间变换
    pub fn set_world_transform(&mut self, id: BoneId, position: Vec3, rotation: Quat) -> Result<()> {
        let bone = self.get_mut(id).ok_or(RigError::BoneNotFound(id))?;
        bone.position = position;
        bone.rotation = rotation;
        Ok(())
    }

    pub fn set_length(&mut self, id: BoneId, length: f32) -> Result<()> {
        let bone = self.get_mut(id).ok_or(RigError::BoneNotFound(id))?;
        bone.length = if length.is_finite() { length.max(0.0) } else { 0.0 };
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn get(&self, id: BoneId) -> Option<&Bone> {
        self.id_to_index.get(&id).map(|&i| &self.bones[i])
    }

    /// 可变引用（父骨骼字段只能通过 `set_parent` 修改）
    pub fn get_mut(&mut self, id: BoneId) -> Option<&mut Bone> {
        let index = *self.id_to_index.get(&id)?;
        self.bones.get_mut(index)
    }

    pub fn bone_at(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bone_at_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.bones.get_mut(index)
    }

    pub fn index_of(&self, id: BoneId) -> Option<usize> {
        self.id_to_index.get(&id).copied()
    }

    /// 父骨骼在列表中的索引
    pub fn parent_index(&self, index: usize) -> Option<usize> {
        self.bones.get(index)?.parent_id.and_then(|p| self.index_of(p))
    }

    /// 通过名称查找骨骼（名称不保证唯一，返回第一个）
    pub fn find_by_name(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|b| b.name == name)
    }

    pub fn children_of(&self, id: BoneId) -> Vec<BoneId> {
        self.bones
            .iter()
            .filter(|b| b.parent_id == Some(id))
            .map(|b| b.id)
            .collect()
    }

    pub fn roots(&self) -> Vec<BoneId> {
        self.bones.iter().filter(|b| b.parent_id.is_none()).map(|b| b.id).collect()
    }

    /// 广度优先顺序（根 → 叶），父骨骼总是先于子骨骼出现
    pub fn breadth_first_order(&self) -> Vec<usize> {
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.bones.len()];
        let mut queue = VecDeque::new();
        for (i, _) in self.bones.iter().enumerate() {
            match self.parent_index(i) {
                Some(p) => children[p].push(i),
                None => queue.push_back(i),
            }
        }

        let mut order = Vec::with_capacity(self.bones.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            queue.extend(children[i].iter().copied());
        }
        order
    }

    /// 世界空间变换
    pub fn world_transform(&self, index: usize) -> BoneTransform {
        self.bones.get(index).map(|b| b.world_transform()).unwrap_or_default()
    }

    /// 结构哈希：由 `id:parentId` 对按顺序计算，用于判断是否需要重新绑定
    pub fn structure_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for bone in &self.bones {
            let parent = bone.parent_id.map(|p| p.0 as i64).unwrap_or(-1);
            hasher.update(format!("{}:{};", bone.id.0, parent).as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    fn rebuild_index(&mut self) {
        self.id_to_index = self.bones.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
    }
}
