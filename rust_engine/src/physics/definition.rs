//! 刚体与关节定义（模型作者提供的只读数据）
//!
//! 角度均为弧度，欧拉角按 Y-X-Z 顺序合成（`ry * rx * rz`）。

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// 碰撞形状类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeType {
    Sphere,
    Box,
    Capsule,
    /// 无法识别的形状编号，构建时跳过
    Unknown(u8),
}

impl From<u8> for ShapeType {
    fn from(value: u8) -> Self {
        match value {
            0 => ShapeType::Sphere,
            1 => ShapeType::Box,
            2 => ShapeType::Capsule,
            other => ShapeType::Unknown(other),
        }
    }
}

/// 刚体驱动模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveMode {
    /// 跟随骨骼（运动学）
    BoneFollowing,
    /// 完全由物理驱动
    Dynamic,
    /// 物理驱动旋转，位置跟随骨骼
    DynamicFollowsBone,
}

/// 刚体定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyDefinition {
    pub name: String,
    /// 关联骨骼索引（-1 表示无）
    pub bone_index: i32,
    /// 骨骼名称，索引越界时用于回退查找
    pub bone_name: Option<String>,
    pub shape_type: ShapeType,
    /// 球：x 为半径；盒：半边长；胶囊：x 为半径，y 为高度
    pub shape_size: Vec3,
    /// 模型空间中的形状位置
    pub shape_position: Vec3,
    /// 模型空间中的形状旋转（欧拉角）
    pub shape_rotation: Vec3,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// 碰撞组编号（0..16）
    pub collision_group: u8,
    /// 碰撞掩码（置位表示可以碰撞的组）
    pub collision_mask: u16,
    pub drive_mode: DriveMode,
}

impl Default for RigidBodyDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            bone_index: -1,
            bone_name: None,
            shape_type: ShapeType::Sphere,
            shape_size: Vec3::ONE,
            shape_position: Vec3::ZERO,
            shape_rotation: Vec3::ZERO,
            mass: 1.0,
            friction: 0.5,
            restitution: 0.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            collision_group: 0,
            collision_mask: 0xFFFF,
            drive_mode: DriveMode::BoneFollowing,
        }
    }
}

impl RigidBodyDefinition {
    /// 形状在模型空间中的变换
    pub fn shape_transform(&self, scaling_factor: f32) -> Mat4 {
        Mat4::from_rotation_translation(
            euler_yxz(self.shape_rotation),
            self.shape_position * scaling_factor,
        )
    }
}

/// 关节定义（6DOF 弹簧约束）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointDefinition {
    pub name: String,
    pub rigid_body_a: i32,
    pub rigid_body_b: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub position_min: Vec3,
    pub position_max: Vec3,
    pub rotation_min: Vec3,
    pub rotation_max: Vec3,
    pub spring_position: Vec3,
    pub spring_rotation: Vec3,
}

impl Default for JointDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            rigid_body_a: -1,
            rigid_body_b: -1,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            position_min: Vec3::ZERO,
            position_max: Vec3::ZERO,
            rotation_min: Vec3::ZERO,
            rotation_max: Vec3::ZERO,
            spring_position: Vec3::ZERO,
            spring_rotation: Vec3::ZERO,
        }
    }
}

impl JointDefinition {
    /// 关节在模型空间中的变换
    pub fn joint_transform(&self, scaling_factor: f32) -> Mat4 {
        Mat4::from_rotation_translation(euler_yxz(self.rotation), self.position * scaling_factor)
    }
}

/// 欧拉角转四元数（Y-X-Z 顺序）
pub fn euler_yxz(rotation: Vec3) -> Quat {
    let rx = Quat::from_rotation_x(rotation.x);
    let ry = Quat::from_rotation_y(rotation.y);
    let rz = Quat::from_rotation_z(rotation.z);
    ry * rx * rz
}
