//! 骨骼管理器

use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;

use super::hierarchy::{compute_bone_depths, BoneHierarchy};
use super::Bone;

/// 骨骼管理器
pub struct BoneManager {
    bones: Vec<Bone>,
    name_to_index: HashMap<String, usize>,
    /// 按层级深度排序的骨骼索引（父骨骼总在子骨骼之前）
    sorted_indices: Vec<usize>,
    children: Vec<Vec<usize>>,
}

impl BoneManager {
    pub fn new() -> Self {
        Self {
            bones: Vec::new(),
            name_to_index: HashMap::new(),
            sorted_indices: Vec::new(),
            children: Vec::new(),
        }
    }

    /// 添加骨骼，返回索引
    pub fn add_bone(&mut self, bone: Bone) -> usize {
        let index = self.bones.len();
        self.name_to_index.entry(bone.name.clone()).or_insert(index);
        self.bones.push(bone);
        index
    }

    /// 构建骨骼层级
    ///
    /// 计算父子偏移、子骨骼表和深度排序，并把所有骨骼放到初始姿势。
    pub fn build_hierarchy(&mut self) {
        let bone_count = self.bones.len();

        self.children = vec![Vec::new(); bone_count];
        for i in 0..bone_count {
            if let Some(parent) = self.bones[i].parent().filter(|&p| p < bone_count && p != i) {
                self.children[parent].push(i);
            }
        }

        for i in 0..bone_count {
            let pos = self.bones[i].initial_position;
            let offset = match self.valid_parent(i) {
                Some(parent) => pos - self.bones[parent].initial_position,
                None => pos,
            };
            self.bones[i].bone_offset = offset;
            self.bones[i].local_transform = Mat4::from_translation(offset);
            self.bones[i].global_transform = Mat4::from_translation(pos);
        }

        let depths = compute_bone_depths(self);
        self.sorted_indices = (0..bone_count).collect();
        self.sorted_indices.sort_by_key(|&i| depths[i]);
    }

    fn valid_parent(&self, index: usize) -> Option<usize> {
        self.bones[index]
            .parent()
            .filter(|&p| p < self.bones.len() && p != index)
    }

    /// 通过名称查找骨骼
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// 获取骨骼数量
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// 获取骨骼
    pub fn get_bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    /// 获取可变骨骼引用
    pub fn get_bone_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.bones.get_mut(index)
    }

    /// 开始更新：清空上一帧的动画状态
    pub fn begin_update(&mut self) {
        for bone in &mut self.bones {
            bone.reset_animation();
        }
    }

    /// 设置骨骼动画平移
    pub fn set_bone_translation(&mut self, index: usize, translation: Vec3) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.animation_translate = translation;
        }
    }

    /// 设置骨骼动画旋转
    pub fn set_bone_rotation(&mut self, index: usize, rotation: Quat) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.animation_rotate = rotation;
        }
    }

    /// 按深度顺序更新所有骨骼的局部和全局变换
    pub fn update_transforms(&mut self) {
        for i in 0..self.sorted_indices.len() {
            let idx = self.sorted_indices[i];
            self.bones[idx].update_local_transform();
            self.update_world_matrix(idx);
        }
    }

    /// 获取全局变换
    pub fn get_global_transform(&self, index: usize) -> Mat4 {
        self.bones
            .get(index)
            .map(|b| b.global_transform)
            .unwrap_or(Mat4::IDENTITY)
    }
}

impl BoneHierarchy for BoneManager {
    fn bone_count(&self) -> usize {
        self.bones.len()
    }

    fn bone_name(&self, index: usize) -> Option<&str> {
        self.bones.get(index).map(|b| b.name.as_str())
    }

    fn parent_bone(&self, index: usize) -> Option<usize> {
        if index >= self.bones.len() {
            return None;
        }
        self.valid_parent(index)
    }

    fn child_bones(&self, index: usize) -> Vec<usize> {
        self.children.get(index).cloned().unwrap_or_default()
    }

    fn world_matrix(&self, index: usize) -> Mat4 {
        self.get_global_transform(index)
    }

    fn set_world_matrix(&mut self, index: usize, matrix: Mat4) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.global_transform = matrix;
        }
    }

    fn update_world_matrix(&mut self, index: usize) {
        if index >= self.bones.len() {
            return;
        }
        let global = match self.valid_parent(index) {
            Some(parent) => self.bones[parent].global_transform * self.bones[index].local_transform,
            None => self.bones[index].local_transform,
        };
        self.bones[index].global_transform = global;
    }

    fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }
}

impl Default for BoneManager {
    fn default() -> Self {
        Self::new()
    }
}
