//! 物理引擎能力接口
//!
//! 构建器和同步算法只依赖这里的 trait，具体引擎（Rapier 或测试用的记录后端）
//! 在 trait 之后实现形状、刚体和约束的创建。

use glam::{Mat4, Quat, Vec3};
use std::collections::HashSet;

/// 形状句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeHandle(pub u32);

/// 刚体句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub u32);

/// 约束句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintHandle(pub u32);

/// 刚体变换（不含缩放）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl RigidTransform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self { translation, rotation }
    }

    /// 从矩阵分解（丢弃缩放）
    pub fn from_mat4(matrix: Mat4) -> Self {
        let (_, rotation, translation) = matrix.to_scale_rotation_translation();
        Self { translation, rotation }
    }

    pub fn to_mat4(self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 运动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionType {
    Kinematic,
    Dynamic,
}

/// 形状几何
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeKind {
    Sphere { radius: f32 },
    /// 半边长
    Box { half_extents: Vec3 },
    /// 沿 Y 轴，`height` 为两个半球中心之间的距离
    Capsule { radius: f32, height: f32 },
}

impl ShapeKind {
    /// 是否存在为零的尺寸
    pub fn is_zero_volume(&self) -> bool {
        match *self {
            ShapeKind::Sphere { radius } => radius == 0.0,
            ShapeKind::Box { half_extents } => {
                half_extents.x == 0.0 || half_extents.y == 0.0 || half_extents.z == 0.0
            }
            ShapeKind::Capsule { radius, height } => radius == 0.0 || height == 0.0,
        }
    }
}

/// 形状描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeDesc {
    pub kind: ShapeKind,
    pub friction: f32,
    pub restitution: f32,
    /// 所属碰撞组位
    pub membership: u16,
    /// 可碰撞的组位（0 表示不与任何物体碰撞）
    pub collide_mask: u16,
}

/// 刚体描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub motion_type: MotionType,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub transform: RigidTransform,
}

/// 6DOF 弹簧约束描述
///
/// 坐标系都在各自刚体的局部空间。刚度为 `None` 的轴不启用弹簧。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintDesc {
    pub frame_a: RigidTransform,
    pub frame_b: RigidTransform,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_stiffness: [Option<f32>; 3],
    pub angular_stiffness: [Option<f32>; 3],
}

impl ConstraintDesc {
    /// 把刚度向量转换为按轴的弹簧设置，刚度恰好为 0 的轴不启用
    pub fn spring_axes(stiffness: Vec3) -> [Option<f32>; 3] {
        stiffness.to_array().map(|k| if k == 0.0 { None } else { Some(k) })
    }
}

/// 物理步进之后执行一次的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterStepAction {
    /// 恢复刚体的运动类型（运动学脉冲结束）
    RestoreMotionType { body: BodyHandle, motion_type: MotionType },
}

impl AfterStepAction {
    pub fn body(&self) -> BodyHandle {
        match *self {
            AfterStepAction::RestoreMotionType { body, .. } => body,
        }
    }
}

/// 步进后一次性动作队列
///
/// 每个刚体在队列中最多出现一次，重复入队是空操作。
#[derive(Debug, Default)]
pub struct AfterStepQueue {
    actions: Vec<AfterStepAction>,
    queued: HashSet<BodyHandle>,
}

impl AfterStepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队，刚体已在队列中时返回 false
    pub fn push(&mut self, action: AfterStepAction) -> bool {
        if !self.queued.insert(action.body()) {
            return false;
        }
        self.actions.push(action);
        true
    }

    pub fn contains(&self, body: BodyHandle) -> bool {
        self.queued.contains(&body)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 取出全部动作并清空队列
    pub fn drain(&mut self) -> Vec<AfterStepAction> {
        self.queued.clear();
        std::mem::take(&mut self.actions)
    }

    /// 移除某个刚体的待执行动作（刚体被销毁时）
    pub fn forget(&mut self, body: BodyHandle) {
        if self.queued.remove(&body) {
            self.actions.retain(|a| a.body() != body);
        }
    }
}

/// 物理引擎能力
pub trait PhysicsCapability {
    /// 引擎名称（构建器用于校验引擎种类）
    fn engine_name(&self) -> &str;

    /// 引擎是否可用
    fn is_enabled(&self) -> bool {
        true
    }

    fn create_shape(&mut self, desc: &ShapeDesc) -> ShapeHandle;

    fn create_body(&mut self, shape: ShapeHandle, desc: &BodyDesc) -> BodyHandle;

    fn create_constraint(
        &mut self,
        body_a: BodyHandle,
        body_b: BodyHandle,
        desc: &ConstraintDesc,
    ) -> ConstraintHandle;

    /// 刚体当前世界变换
    fn body_transform(&self, body: BodyHandle) -> RigidTransform;

    /// 立即传送刚体
    fn set_body_transform(&mut self, body: BodyHandle, transform: RigidTransform);

    /// 设置运动学目标（下一步生效）
    fn set_kinematic_target(&mut self, body: BodyHandle, transform: RigidTransform);

    fn set_velocities(&mut self, body: BodyHandle, linear: Vec3, angular: Vec3);

    fn motion_type(&self, body: BodyHandle) -> MotionType;

    fn set_motion_type(&mut self, body: BodyHandle, motion_type: MotionType);

    /// 安排一个在下一次物理步进之后执行的动作
    ///
    /// 同一刚体已有待执行动作时返回 false 且不重复入队。
    fn schedule_after_step(&mut self, action: AfterStepAction) -> bool;

    /// 推进模拟，结束后执行步进后队列
    fn step(&mut self, delta_time: f32);

    fn remove_constraint(&mut self, constraint: ConstraintHandle);

    fn remove_shape(&mut self, shape: ShapeHandle);

    fn remove_body(&mut self, body: BodyHandle);
}
