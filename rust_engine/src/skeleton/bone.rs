//! 骨骼节点

use glam::{Mat4, Quat, Vec3};

/// 骨骼节点
#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent_index: i32,

    // 初始位置（模型空间）
    pub initial_position: Vec3,
    // 相对于父骨骼的偏移（在 build_hierarchy 中计算）
    pub bone_offset: Vec3,

    // 动画状态
    pub animation_translate: Vec3,
    pub animation_rotate: Quat,

    // 变换结果
    pub local_transform: Mat4,
    pub global_transform: Mat4,
}

impl Bone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_index: -1,
            initial_position: Vec3::ZERO,
            bone_offset: Vec3::ZERO,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            local_transform: Mat4::IDENTITY,
            global_transform: Mat4::IDENTITY,
        }
    }

    /// 以父骨骼索引和初始位置创建
    pub fn with_parent(name: impl Into<String>, parent_index: i32, initial_position: Vec3) -> Self {
        let mut bone = Self::new(name);
        bone.parent_index = parent_index;
        bone.initial_position = initial_position;
        bone
    }

    /// 父骨骼索引（-1 表示根骨骼）
    pub fn parent(&self) -> Option<usize> {
        usize::try_from(self.parent_index).ok()
    }

    /// 重置动画状态
    pub fn reset_animation(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
    }

    /// 更新本地变换
    /// 平移 = bone_offset + animation_translate，旋转 = animation_rotate
    pub fn update_local_transform(&mut self) {
        let translate = self.bone_offset + self.animation_translate;
        self.local_transform = Mat4::from_rotation_translation(self.animation_rotate, translate);
    }
}

impl Default for Bone {
    fn default() -> Self {
        Self::new(String::new())
    }
}
