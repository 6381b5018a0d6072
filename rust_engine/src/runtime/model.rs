//! 运行时模型
//!
//! 骨骼 + 可选的物理模型 + 当前动画。每帧由 [`MmdRuntime`](super::MmdRuntime)
//! 驱动：物理步进前求值动画并同步刚体，步进后把物理结果写回骨骼。

use glam::Mat4;
use slotmap::new_key_type;

use crate::physics::{PhysicsCapability, PhysicsModel};
use crate::skeleton::BoneManager;

new_key_type! {
    /// 运行时模型句柄
    pub struct ModelId;
}

/// 模型动画
pub trait ModelAnimation {
    /// 结束帧（30fps）
    fn end_frame(&self) -> f64;

    /// 在指定帧求值并写入骨骼动画状态
    fn animate(&mut self, frame_time: f64, skeleton: &mut BoneManager);
}

/// 相机动画
pub trait CameraAnimation {
    fn end_frame(&self) -> f64;

    fn animate(&mut self, frame_time: f64);
}

/// 运行时模型
pub struct MmdModel {
    name: String,
    skeleton: BoneManager,
    physics: Option<PhysicsModel>,
    animation: Option<Box<dyn ModelAnimation>>,
}

impl MmdModel {
    pub(crate) fn new(name: String, skeleton: BoneManager, physics: Option<PhysicsModel>) -> Self {
        Self {
            name,
            skeleton,
            physics,
            animation: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn skeleton(&self) -> &BoneManager {
        &self.skeleton
    }

    pub fn skeleton_mut(&mut self) -> &mut BoneManager {
        &mut self.skeleton
    }

    pub fn physics(&self) -> Option<&PhysicsModel> {
        self.physics.as_ref()
    }

    pub fn has_animation(&self) -> bool {
        self.animation.is_some()
    }

    pub(crate) fn animation_end_frame(&self) -> Option<f64> {
        self.animation.as_ref().map(|a| a.end_frame())
    }

    pub(crate) fn set_animation(&mut self, animation: Option<Box<dyn ModelAnimation>>) {
        self.animation = animation;
    }

    /// 设置模型根变换（影响刚体世界位置）
    pub fn set_root_transform(&mut self, root_transform: Mat4) {
        if let Some(physics) = self.physics.as_mut() {
            physics.set_root_transform(root_transform);
        }
    }

    /// 只求值动画（跳转时强制刷新用）
    pub(crate) fn animate(&mut self, frame_time: f64) {
        if let Some(animation) = self.animation.as_mut() {
            self.skeleton.begin_update();
            animation.animate(frame_time, &mut self.skeleton);
        }
    }

    /// 物理步进前：求值动画（`frame_time` 为 None 时保持当前姿势），更新骨骼，同步运动学刚体
    pub(crate) fn before_physics(
        &mut self,
        frame_time: Option<f64>,
        physics: Option<&mut dyn PhysicsCapability>,
    ) {
        if let Some(frame_time) = frame_time {
            self.animate(frame_time);
        }
        self.skeleton.update_transforms();

        if let (Some(model), Some(physics)) = (self.physics.as_mut(), physics) {
            model.sync_bodies_from_bones(&self.skeleton, physics);
        }
    }

    /// 物理步进后：刚体结果写回骨骼
    pub(crate) fn after_physics(&mut self, physics: Option<&dyn PhysicsCapability>) {
        if let (Some(model), Some(physics)) = (self.physics.as_mut(), physics) {
            model.sync_bones_from_bodies(&mut self.skeleton, physics);
        }
    }

    pub(crate) fn initialize_physics(&mut self, physics: Option<&mut dyn PhysicsCapability>) {
        if let (Some(model), Some(physics)) = (self.physics.as_mut(), physics) {
            model.initialize(&self.skeleton, physics);
        }
    }

    pub(crate) fn dispose(&mut self, physics: Option<&mut dyn PhysicsCapability>) {
        if let (Some(mut model), Some(physics)) = (self.physics.take(), physics) {
            model.dispose(physics);
        }
        self.animation = None;
    }
}

impl std::fmt::Debug for MmdModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmdModel")
            .field("name", &self.name)
            .field("bones", &self.skeleton.bone_count())
            .field("physics", &self.physics.is_some())
            .field("animation", &self.animation.is_some())
            .finish()
    }
}
