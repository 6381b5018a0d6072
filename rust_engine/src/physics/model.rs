//! 物理模型：骨骼与刚体的双向同步
//!
//! 节点按骨骼深度升序排列，所以一次线性遍历就能保证父骨骼先于子骨骼写回。

use glam::{Mat4, Quat, Vec3};

use super::capability::{
    AfterStepAction, BodyHandle, ConstraintHandle, MotionType, PhysicsCapability, RigidTransform,
    ShapeHandle,
};
use super::definition::DriveMode;
use crate::skeleton::BoneHierarchy;

/// 物理节点（每个成功构建的刚体一个）
///
/// `scaling/rotation/position` 是刚体在模型空间（根节点之下）的变换。
#[derive(Debug, Clone)]
pub struct PhysicsNode {
    pub name: String,
    /// 在刚体定义数组中的下标
    pub definition_index: usize,
    /// 关联骨骼索引（只保存索引，不持有骨骼）
    pub bone: Option<usize>,
    pub drive_mode: DriveMode,
    /// 骨骼空间 → 刚体静止姿势
    pub body_offset: Mat4,
    pub body_offset_inverse: Mat4,
    pub body: BodyHandle,
    pub shape: ShapeHandle,
    pub scaling: Vec3,
    pub rotation: Quat,
    pub position: Vec3,
}

impl PhysicsNode {
    /// 模型空间变换
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scaling, self.rotation, self.position)
    }

    fn set_local_matrix(&mut self, matrix: Mat4) {
        let (scaling, rotation, position) = matrix.to_scale_rotation_translation();
        self.scaling = scaling;
        self.rotation = rotation;
        self.position = position;
    }
}

/// 物理模型
///
/// 由 [`PhysicsModelBuilder`](super::PhysicsModelBuilder) 创建，
/// 构建失败的刚体和关节以 `None` 占位。
#[derive(Debug)]
pub struct PhysicsModel {
    pub(crate) nodes: Vec<Option<PhysicsNode>>,
    pub(crate) constraints: Vec<Option<ConstraintHandle>>,
    root_transform: Mat4,
    root_inverse: Mat4,
}

impl PhysicsModel {
    pub(crate) fn new(root_transform: Mat4) -> Self {
        Self {
            nodes: Vec::new(),
            constraints: Vec::new(),
            root_transform,
            root_inverse: root_transform.inverse(),
        }
    }

    /// 节点（含 `None` 占位，按骨骼深度排序）
    pub fn nodes(&self) -> &[Option<PhysicsNode>] {
        &self.nodes
    }

    /// 约束句柄（按关节定义顺序）
    pub fn constraints(&self) -> &[Option<ConstraintHandle>] {
        &self.constraints
    }

    /// 有效节点数量
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// 有效约束数量
    pub fn constraint_count(&self) -> usize {
        self.constraints.iter().flatten().count()
    }

    /// 按刚体定义下标查找节点
    pub fn find_node(&self, definition_index: usize) -> Option<&PhysicsNode> {
        self.nodes
            .iter()
            .flatten()
            .find(|n| n.definition_index == definition_index)
    }

    pub fn root_transform(&self) -> Mat4 {
        self.root_transform
    }

    /// 设置模型根变换（刚体世界变换 = 根变换 × 模型空间变换）
    pub fn set_root_transform(&mut self, root_transform: Mat4) {
        self.root_transform = root_transform;
        self.root_inverse = root_transform.inverse();
    }

    /// 重置刚体到骨骼当前姿势
    ///
    /// 速度清零；非骨骼跟随的刚体在下一次物理步进中临时作为运动学刚体，
    /// 步进结束后恢复为动态，避免瞬移产生冲量。
    pub fn initialize(&mut self, bones: &dyn BoneHierarchy, physics: &mut dyn PhysicsCapability) {
        let root = self.root_transform;
        for node in self.nodes.iter_mut().flatten() {
            let Some(bone) = node.bone else {
                continue;
            };

            node.set_local_matrix(bones.world_matrix(bone) * node.body_offset);

            let world = RigidTransform::from_mat4(root * node.local_matrix());
            physics.set_body_transform(node.body, world);
            physics.set_velocities(node.body, Vec3::ZERO, Vec3::ZERO);

            if node.drive_mode != DriveMode::BoneFollowing {
                let scheduled = physics.schedule_after_step(AfterStepAction::RestoreMotionType {
                    body: node.body,
                    motion_type: MotionType::Dynamic,
                });
                if scheduled {
                    physics.set_motion_type(node.body, MotionType::Kinematic);
                }
                physics.set_kinematic_target(node.body, world);
            }
        }
    }

    /// 骨骼 → 刚体（只处理骨骼跟随的刚体）
    pub fn sync_bodies_from_bones(
        &mut self,
        bones: &dyn BoneHierarchy,
        physics: &mut dyn PhysicsCapability,
    ) {
        let root = self.root_transform;
        for node in self.nodes.iter_mut().flatten() {
            let Some(bone) = node.bone else {
                continue;
            };

            match node.drive_mode {
                DriveMode::BoneFollowing => {
                    node.set_local_matrix(bones.world_matrix(bone) * node.body_offset);
                    let target = RigidTransform::from_mat4(root * node.local_matrix());
                    physics.set_kinematic_target(node.body, target);
                }
                DriveMode::Dynamic | DriveMode::DynamicFollowsBone => {}
            }
        }
    }

    /// 刚体 → 骨骼
    ///
    /// 直接写入骨骼世界矩阵，然后强制子骨骼重新计算。
    pub fn sync_bones_from_bodies(
        &mut self,
        bones: &mut dyn BoneHierarchy,
        physics: &dyn PhysicsCapability,
    ) {
        let root_inverse = self.root_inverse;
        for node in self.nodes.iter_mut().flatten() {
            let Some(bone) = node.bone else {
                continue;
            };

            match node.drive_mode {
                DriveMode::BoneFollowing => {}
                DriveMode::Dynamic => {
                    pull_body_transform(node, root_inverse, physics);
                    let world = node.local_matrix() * node.body_offset_inverse;
                    bones.set_world_matrix(bone, world);
                    bones.force_recompute_children(bone);
                }
                DriveMode::DynamicFollowsBone => {
                    let bone_position = bones.world_translation(bone);
                    pull_body_transform(node, root_inverse, physics);
                    let oriented =
                        Mat4::from_scale_rotation_translation(node.scaling, node.rotation, Vec3::ZERO);
                    bones.set_world_matrix(bone, oriented * node.body_offset_inverse);
                    bones.set_world_translation(bone, bone_position);
                    bones.force_recompute_children(bone);
                }
            }
        }
    }

    /// 释放约束、形状和刚体，并清空所有集合
    pub fn dispose(&mut self, physics: &mut dyn PhysicsCapability) {
        for constraint in self.constraints.drain(..).flatten() {
            physics.remove_constraint(constraint);
        }
        for node in self.nodes.drain(..).flatten() {
            physics.remove_shape(node.shape);
            physics.remove_body(node.body);
        }
    }
}

/// 读取刚体世界变换并转换到模型空间，保留节点原有缩放
fn pull_body_transform(node: &mut PhysicsNode, root_inverse: Mat4, physics: &dyn PhysicsCapability) {
    let world = physics.body_transform(node.body).to_mat4();
    let (_, rotation, position) = (root_inverse * world).to_scale_rotation_translation();
    node.rotation = rotation;
    node.position = position;
}
