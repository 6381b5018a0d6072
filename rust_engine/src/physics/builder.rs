//! 物理模型构建器
//!
//! 把刚体/关节定义转换为物理引擎中的刚体和约束，并对驱动模式做关节分析。
//! 单个刚体或关节的问题只记录警告并跳过，只有引擎不可用才会让整个构建失败。

use glam::Mat4;

use super::capability::{
    BodyDesc, ConstraintDesc, ConstraintHandle, MotionType, PhysicsCapability, RigidTransform, ShapeDesc, ShapeKind,
};
use super::definition::{DriveMode, JointDefinition, RigidBodyDefinition, ShapeType};
use super::model::{PhysicsModel, PhysicsNode};
use crate::logger::Logger;
use crate::skeleton::{compute_bone_depths, BoneHierarchy};
use crate::BuildError;

/// 缩放判定容差
const SCALE_EPSILON: f32 = 0.0001;

/// 物理模型构建器
pub struct PhysicsModelBuilder<'a> {
    logger: &'a dyn Logger,
    expected_engine: Option<&'a str>,
}

impl<'a> PhysicsModelBuilder<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self {
            logger,
            expected_engine: None,
        }
    }

    /// 要求物理引擎名称匹配，不匹配时构建失败
    pub fn with_expected_engine(mut self, engine_name: &'a str) -> Self {
        self.expected_engine = Some(engine_name);
        self
    }

    /// 构建物理模型
    ///
    /// # 参数
    /// - `root_transform`: 模型根节点的世界变换
    /// - `bones`: 骨骼层级（读取当前世界矩阵作为静止姿势）
    /// - `rigid_bodies`: 刚体定义
    /// - `joints`: 关节定义
    /// - `physics`: 物理引擎
    pub fn build(
        &self,
        root_transform: Mat4,
        bones: &dyn BoneHierarchy,
        rigid_bodies: &[RigidBodyDefinition],
        joints: &[JointDefinition],
        physics: &mut dyn PhysicsCapability,
    ) -> Result<PhysicsModel, BuildError> {
        if !physics.is_enabled() {
            return Err(BuildError::EngineUnavailable);
        }
        if let Some(expected) = self.expected_engine {
            if physics.engine_name() != expected {
                return Err(BuildError::EngineMismatch {
                    expected: expected.to_string(),
                    found: physics.engine_name().to_string(),
                });
            }
        }

        let scaling_factor = self.scaling_factor(root_transform);

        let mut model = PhysicsModel::new(root_transform);

        // 刚体
        let mut nodes: Vec<Option<PhysicsNode>> = Vec::with_capacity(rigid_bodies.len());
        for (index, definition) in rigid_bodies.iter().enumerate() {
            let node = self.build_node(index, definition, scaling_factor, &model, bones, physics);
            nodes.push(node);
        }

        // 关节
        let mut constraints = Vec::with_capacity(joints.len());
        for joint in joints {
            let constraint =
                self.build_joint(joint, rigid_bodies, &mut nodes, scaling_factor, bones, physics);
            constraints.push(constraint);
        }

        // 按骨骼深度排序，父骨骼的刚体总是先于子骨骼的刚体
        let depths = compute_bone_depths(bones);
        let depth_of = |node: &Option<PhysicsNode>| -> i32 {
            node.as_ref()
                .and_then(|n| n.bone)
                .and_then(|b| depths.get(b).copied())
                .unwrap_or(-1)
        };
        nodes.sort_by_key(|n| depth_of(n));

        model.nodes = nodes;
        model.constraints = constraints;

        if crate::physics::get_config().debug_log {
            log::info!(
                "[物理构建] 刚体 {} 个（有效 {}），约束 {} 个（有效 {}）",
                rigid_bodies.len(),
                model.node_count(),
                joints.len(),
                model.constraint_count()
            );
        }

        Ok(model)
    }

    /// 根节点缩放检查
    fn scaling_factor(&self, root_transform: Mat4) -> f32 {
        let (scale, _, _) = root_transform.to_scale_rotation_translation();
        let uniform = (scale.x - scale.y).abs() < SCALE_EPSILON && (scale.y - scale.z).abs() < SCALE_EPSILON;
        if uniform {
            if (scale.x - 1.0).abs() < SCALE_EPSILON {
                1.0
            } else {
                self.logger
                    .warn("Root node scaling is not 1, simulation may differ from MMD");
                scale.x
            }
        } else {
            self.logger
                .warn("Root node scaling is not uniform, physics may not work correctly");
            scale.max_element()
        }
    }

    /// 解析刚体关联的骨骼：优先按索引，越界时按名称回退
    fn resolve_bone(definition: &RigidBodyDefinition, bones: &dyn BoneHierarchy) -> Option<usize> {
        let in_range = usize::try_from(definition.bone_index)
            .ok()
            .filter(|&i| i < bones.bone_count());
        match in_range {
            Some(index) => Some(index),
            None => {
                let name = definition.bone_name.as_deref().unwrap_or(&definition.name);
                bones.find_bone_by_name(name)
            }
        }
    }

    fn shape_kind(definition: &RigidBodyDefinition, scaling_factor: f32) -> Option<ShapeKind> {
        let size = definition.shape_size * scaling_factor;
        match definition.shape_type {
            ShapeType::Sphere => Some(ShapeKind::Sphere { radius: size.x }),
            ShapeType::Box => Some(ShapeKind::Box { half_extents: size }),
            ShapeType::Capsule => Some(ShapeKind::Capsule {
                radius: size.x,
                height: size.y,
            }),
            ShapeType::Unknown(_) => None,
        }
    }

    fn build_node(
        &self,
        index: usize,
        definition: &RigidBodyDefinition,
        scaling_factor: f32,
        model: &PhysicsModel,
        bones: &dyn BoneHierarchy,
        physics: &mut dyn PhysicsCapability,
    ) -> Option<PhysicsNode> {
        let bone = Self::resolve_bone(definition, bones);
        let Some(bone) = bone else {
            self.logger.warn(&format!(
                "Bone index out of range create unmapped rigid body: {}",
                definition.name
            ));
            return None;
        };

        let Some(kind) = Self::shape_kind(definition, scaling_factor) else {
            if let ShapeType::Unknown(raw) = definition.shape_type {
                self.logger
                    .warn(&format!("Unknown rigid body shape type: {}", raw));
            }
            return None;
        };

        // 零体积形状不参与碰撞
        let zero_volume = kind.is_zero_volume();
        let shape = physics.create_shape(&ShapeDesc {
            kind,
            friction: definition.friction,
            restitution: definition.restitution,
            membership: 1u16 << (definition.collision_group & 0x0F),
            collide_mask: if zero_volume { 0 } else { definition.collision_mask },
        });

        // 刚体相对骨骼的偏移：bone_world⁻¹ * shape_local
        let shape_local = definition.shape_transform(1.0);
        let body_offset = bones.world_matrix(bone).inverse() * shape_local;

        let local = bones.world_matrix(bone) * body_offset;
        let (scaling, rotation, position) = local.to_scale_rotation_translation();
        let world = RigidTransform::from_mat4(model.root_transform() * local);

        let (motion_type, mass) = match definition.drive_mode {
            DriveMode::BoneFollowing => (MotionType::Kinematic, 0.0),
            DriveMode::Dynamic | DriveMode::DynamicFollowsBone => {
                (MotionType::Dynamic, definition.mass)
            }
        };

        let body = physics.create_body(
            shape,
            &BodyDesc {
                motion_type,
                mass,
                linear_damping: definition.linear_damping,
                angular_damping: definition.angular_damping,
                transform: world,
            },
        );

        Some(PhysicsNode {
            name: definition.name.clone(),
            definition_index: index,
            bone: Some(bone),
            drive_mode: definition.drive_mode,
            body_offset,
            body_offset_inverse: body_offset.inverse(),
            body,
            shape,
            scaling,
            rotation,
            position,
        })
    }

    fn build_joint(
        &self,
        joint: &JointDefinition,
        rigid_bodies: &[RigidBodyDefinition],
        nodes: &mut [Option<PhysicsNode>],
        scaling_factor: f32,
        bones: &dyn BoneHierarchy,
        physics: &mut dyn PhysicsCapability,
    ) -> Option<ConstraintHandle> {
        let in_range = |i: i32| usize::try_from(i).ok().filter(|&i| i < rigid_bodies.len());
        let (Some(index_a), Some(index_b)) = (in_range(joint.rigid_body_a), in_range(joint.rigid_body_b))
        else {
            self.logger.warn(&format!(
                "Rigid body index out of range failed to create joint: {}",
                joint.name
            ));
            return None;
        };

        let (body_a, body_b) = match (&nodes[index_a], &nodes[index_b]) {
            (Some(a), Some(b)) => (a.body, b.body),
            _ => {
                self.logger.warn(&format!(
                    "Rigid body not found failed to create joint: {}",
                    joint.name
                ));
                return None;
            }
        };

        let definition_a = &rigid_bodies[index_a];
        let definition_b = &rigid_bodies[index_b];

        // 关节在各自刚体局部空间中的坐标系
        let joint_transform = joint.joint_transform(scaling_factor);
        let frame_a = definition_a.shape_transform(scaling_factor).inverse() * joint_transform;
        let frame_b = definition_b.shape_transform(scaling_factor).inverse() * joint_transform;

        let desc = ConstraintDesc {
            frame_a: RigidTransform::from_mat4(frame_a),
            frame_b: RigidTransform::from_mat4(frame_b),
            linear_lower: joint.position_min,
            linear_upper: joint.position_max,
            angular_lower: joint.rotation_min,
            angular_upper: joint.rotation_max,
            linear_stiffness: ConstraintDesc::spring_axes(joint.spring_position),
            angular_stiffness: ConstraintDesc::spring_axes(joint.spring_rotation),
        };
        let constraint = physics.create_constraint(body_a, body_b, &desc);

        self.promote_drive_modes(index_a, index_b, rigid_bodies, nodes, bones);

        Some(constraint)
    }

    /// 关节两端的驱动模式修正
    ///
    /// A 不是骨骼跟随、B 是 DynamicFollowsBone 且 B 的父骨骼就是 A 的骨骼时，
    /// B 改为 Dynamic；反方向同理。只检查直接父骨骼。
    fn promote_drive_modes(
        &self,
        index_a: usize,
        index_b: usize,
        rigid_bodies: &[RigidBodyDefinition],
        nodes: &mut [Option<PhysicsNode>],
        bones: &dyn BoneHierarchy,
    ) {
        let (Some(mode_a), Some(mode_b)) = (
            nodes[index_a].as_ref().map(|n| n.drive_mode),
            nodes[index_b].as_ref().map(|n| n.drive_mode),
        ) else {
            return;
        };

        let (Some(bone_a), Some(bone_b)) = (
            Self::resolve_bone(&rigid_bodies[index_a], bones),
            Self::resolve_bone(&rigid_bodies[index_b], bones),
        ) else {
            return;
        };

        let promoted = if mode_a != DriveMode::BoneFollowing && mode_b == DriveMode::DynamicFollowsBone {
            (bones.parent_bone(bone_b) == Some(bone_a)).then_some(index_b)
        } else if mode_b != DriveMode::BoneFollowing && mode_a == DriveMode::DynamicFollowsBone {
            (bones.parent_bone(bone_a) == Some(bone_b)).then_some(index_a)
        } else {
            None
        };

        if let Some(node) = promoted.and_then(|i| nodes[i].as_mut()) {
            node.drive_mode = DriveMode::Dynamic;
        }
    }
}

