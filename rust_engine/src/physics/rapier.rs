//! Rapier3D 物理后端
//!
//! ## 对应关系
//! | 能力接口 | Rapier |
//! |----------|--------|
//! | 形状 | SharedShape + Collider（挂到刚体时才创建） |
//! | 刚体 | RigidBody（Kinematic 使用 KinematicPositionBased） |
//! | 6DOF 弹簧约束 | GenericJoint + limits + motors |
//! | 步进后一次性动作 | `AfterStepQueue`，在 `step` 末尾执行 |

use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;
use std::num::NonZeroUsize;

use super::capability::{
    AfterStepAction, AfterStepQueue, BodyDesc, BodyHandle, ConstraintDesc, ConstraintHandle,
    MotionType, PhysicsCapability, RigidTransform, ShapeDesc, ShapeHandle, ShapeKind,
};
use super::config::{get_config, PhysicsConfig};

const LOCK_EPSILON: f32 = 0.0001;

struct ShapeSlot {
    desc: ShapeDesc,
    collider: Option<ColliderHandle>,
}

struct BodySlot {
    handle: RigidBodyHandle,
    shape: ShapeHandle,
    motion_type: MotionType,
}

/// Rapier 物理世界
pub struct RapierPhysics {
    physics_pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector<Real>,
    config: PhysicsConfig,

    shapes: Vec<Option<ShapeSlot>>,
    bodies: Vec<Option<BodySlot>>,
    constraints: Vec<Option<ImpulseJointHandle>>,
    after_step: AfterStepQueue,
}

impl RapierPhysics {
    pub const ENGINE_NAME: &'static str = "rapier3d";

    /// 使用当前全局配置创建物理世界
    pub fn new() -> Self {
        Self::with_config(get_config())
    }

    pub fn with_config(config: PhysicsConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = 1.0 / config.physics_fps;
        integration_parameters.num_solver_iterations =
            NonZeroUsize::new(config.solver_iterations).unwrap_or(NonZeroUsize::MIN);
        integration_parameters.num_internal_pgs_iterations = config.pgs_iterations;
        integration_parameters.normalized_max_corrective_velocity = config.max_corrective_velocity;

        if config.debug_log {
            log::info!(
                "[物理配置] FPS={}, 重力Y={}, 求解器迭代={}, PGS迭代={}",
                config.physics_fps,
                config.gravity_y,
                config.solver_iterations,
                config.pgs_iterations
            );
        }

        Self {
            physics_pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: vector![0.0, config.gravity_y, 0.0],
            config,
            shapes: Vec::new(),
            bodies: Vec::new(),
            constraints: Vec::new(),
            after_step: AfterStepQueue::new(),
        }
    }

    /// 设置重力
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = vector![gravity.x, gravity.y, gravity.z];
    }

    /// 有效刚体数量
    pub fn body_count(&self) -> usize {
        self.bodies.iter().flatten().count()
    }

    /// 有效约束数量
    pub fn constraint_count(&self) -> usize {
        self.constraints.iter().flatten().count()
    }

    /// 等待执行的步进后动作数量
    pub fn pending_after_step(&self) -> usize {
        self.after_step.len()
    }

    fn body_slot(&self, body: BodyHandle) -> Option<&BodySlot> {
        self.bodies.get(body.0 as usize).and_then(Option::as_ref)
    }

    fn rigid_body_mut(&mut self, body: BodyHandle) -> Option<&mut RigidBody> {
        let handle = self.body_slot(body)?.handle;
        self.rigid_body_set.get_mut(handle)
    }

    /// Bullet 的阻尼是每步的速度衰减比例，换算为连续阻尼系数
    fn convert_damping(&self, value: f32) -> f32 {
        if !self.config.convert_bullet_damping {
            return value;
        }
        let time_step = 1.0 / 60.0;
        let value = value.clamp(0.0, 1.0);
        (1.0 - (1.0 - value).powf(time_step)) / time_step
    }

    fn clamp_angular_limit(&self, limit: f32) -> f32 {
        if limit.abs() < self.config.angular_limit_clamp_threshold {
            0.0
        } else {
            limit
        }
    }

    fn build_collider(&self, desc: &ShapeDesc, motion_type: MotionType, mass: f32) -> Collider {
        let shape = match desc.kind {
            ShapeKind::Sphere { radius } => SharedShape::ball(radius),
            ShapeKind::Box { half_extents } => {
                SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            // Rapier 胶囊沿 Y 轴，参数为半高和半径
            ShapeKind::Capsule { radius, height } => SharedShape::capsule_y(height / 2.0, radius),
        };

        let groups = InteractionGroups::new(
            Group::from_bits_truncate(u32::from(desc.membership)),
            Group::from_bits_truncate(u32::from(desc.collide_mask)),
        );

        let builder = ColliderBuilder::new(shape)
            .friction(desc.friction)
            .restitution(desc.restitution)
            .collision_groups(groups)
            .solver_groups(groups);

        let builder = if motion_type == MotionType::Kinematic || mass <= 0.0 {
            builder.density(0.0)
        } else {
            builder.mass(mass * self.config.mass_scale)
        };

        builder.build()
    }

    fn build_joint(&self, desc: &ConstraintDesc) -> GenericJoint {
        let angular_lower = desc.angular_lower.to_array().map(|v| self.clamp_angular_limit(v));
        let angular_upper = desc.angular_upper.to_array().map(|v| self.clamp_angular_limit(v));
        let linear_lower = desc.linear_lower.to_array();
        let linear_upper = desc.linear_upper.to_array();

        const LIN_AXES: [(JointAxis, JointAxesMask); 3] = [
            (JointAxis::LinX, JointAxesMask::LIN_X),
            (JointAxis::LinY, JointAxesMask::LIN_Y),
            (JointAxis::LinZ, JointAxesMask::LIN_Z),
        ];
        const ANG_AXES: [(JointAxis, JointAxesMask); 3] = [
            (JointAxis::AngX, JointAxesMask::ANG_X),
            (JointAxis::AngY, JointAxesMask::ANG_Y),
            (JointAxis::AngZ, JointAxesMask::ANG_Z),
        ];

        // lower == upper 的轴锁定
        let mut locked_axes = JointAxesMask::empty();
        for i in 0..3 {
            if (linear_upper[i] - linear_lower[i]).abs() < LOCK_EPSILON {
                locked_axes |= LIN_AXES[i].1;
            }
            if (angular_upper[i] - angular_lower[i]).abs() < LOCK_EPSILON {
                locked_axes |= ANG_AXES[i].1;
            }
        }

        let mut joint = GenericJointBuilder::new(locked_axes)
            .local_frame1(to_isometry(desc.frame_a))
            .local_frame2(to_isometry(desc.frame_b))
            .build();
        // 关节连接的刚体之间不碰撞
        joint.set_contacts_enabled(false);

        // lower > upper 的轴不设限制（完全自由）
        for i in 0..3 {
            let (axis, mask) = LIN_AXES[i];
            if !locked_axes.contains(mask) && linear_lower[i] < linear_upper[i] {
                joint.set_limits(axis, [linear_lower[i], linear_upper[i]]);
            }
            let (axis, mask) = ANG_AXES[i];
            if !locked_axes.contains(mask) && angular_lower[i] < angular_upper[i] {
                joint.set_limits(axis, [angular_lower[i], angular_upper[i]]);
            }
        }

        // 弹簧用电机模拟：目标位置 0，阻尼 = sqrt(刚度 * 系数)
        let config = &self.config;
        for i in 0..3 {
            let (axis, mask) = LIN_AXES[i];
            if let Some(stiffness) = desc.linear_stiffness[i] {
                if !locked_axes.contains(mask) {
                    let stiffness = stiffness * config.linear_spring_stiffness_scale;
                    let damping = (stiffness.abs() * config.linear_spring_damping_factor).sqrt();
                    joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
                }
            }
            let (axis, mask) = ANG_AXES[i];
            if let Some(stiffness) = desc.angular_stiffness[i] {
                if !locked_axes.contains(mask) {
                    let stiffness = stiffness * config.angular_spring_stiffness_scale;
                    let damping = (stiffness.abs() * config.angular_spring_damping_factor).sqrt();
                    joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
                }
            }
        }

        joint
    }

    /// 执行一次物理步进
    fn step_once(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// 限制动态刚体速度，防止穿模时物理爆炸
    fn clamp_velocities(&mut self) {
        let max_linear = self.config.max_linear_velocity;
        let max_angular = self.config.max_angular_velocity;

        for slot in self.bodies.iter().flatten() {
            if slot.motion_type == MotionType::Kinematic {
                continue;
            }
            let Some(rb) = self.rigid_body_set.get_mut(slot.handle) else {
                continue;
            };

            let linvel = *rb.linvel();
            let linvel_mag = linvel.norm();
            if linvel_mag > max_linear {
                rb.set_linvel(linvel * (max_linear / linvel_mag), true);
            }

            let angvel = *rb.angvel();
            let angvel_mag = angvel.norm();
            if angvel_mag > max_angular {
                rb.set_angvel(angvel * (max_angular / angvel_mag), true);
            }
        }
    }

    fn run_after_step(&mut self) {
        for action in self.after_step.drain() {
            match action {
                AfterStepAction::RestoreMotionType { body, motion_type } => {
                    self.set_motion_type(body, motion_type);
                }
            }
        }
    }
}

impl Default for RapierPhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsCapability for RapierPhysics {
    fn engine_name(&self) -> &str {
        Self::ENGINE_NAME
    }

    fn create_shape(&mut self, desc: &ShapeDesc) -> ShapeHandle {
        let handle = ShapeHandle(self.shapes.len() as u32);
        self.shapes.push(Some(ShapeSlot {
            desc: *desc,
            collider: None,
        }));
        handle
    }

    fn create_body(&mut self, shape: ShapeHandle, desc: &BodyDesc) -> BodyHandle {
        let body_type = match desc.motion_type {
            MotionType::Kinematic => RigidBodyType::KinematicPositionBased,
            MotionType::Dynamic => RigidBodyType::Dynamic,
        };

        let rb = RigidBodyBuilder::new(body_type)
            .position(to_isometry(desc.transform))
            .linear_damping(self.convert_damping(desc.linear_damping) * self.config.linear_damping_scale)
            .angular_damping(
                self.convert_damping(desc.angular_damping) * self.config.angular_damping_scale,
            )
            .ccd_enabled(false)
            // MMD 物理不使用休眠
            .can_sleep(false)
            .build();
        let rb_handle = self.rigid_body_set.insert(rb);

        let collider = self
            .shapes
            .get(shape.0 as usize)
            .and_then(Option::as_ref)
            .map(|slot| self.build_collider(&slot.desc, desc.motion_type, desc.mass));
        match collider {
            Some(collider) => {
                let collider_handle =
                    self.collider_set
                        .insert_with_parent(collider, rb_handle, &mut self.rigid_body_set);
                if let Some(Some(slot)) = self.shapes.get_mut(shape.0 as usize) {
                    slot.collider = Some(collider_handle);
                }
            }
            None => log::warn!("[物理] 刚体引用了不存在的形状 {:?}", shape),
        }

        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(Some(BodySlot {
            handle: rb_handle,
            shape,
            motion_type: desc.motion_type,
        }));
        handle
    }

    fn create_constraint(
        &mut self,
        body_a: BodyHandle,
        body_b: BodyHandle,
        desc: &ConstraintDesc,
    ) -> ConstraintHandle {
        let handle = ConstraintHandle(self.constraints.len() as u32);

        let bodies = self.body_slot(body_a).zip(self.body_slot(body_b));
        let joint_handle = match bodies {
            Some((a, b)) if self.config.joints_enabled => {
                let (a, b) = (a.handle, b.handle);
                let joint = self.build_joint(desc);
                Some(self.impulse_joint_set.insert(a, b, joint, true))
            }
            _ => None,
        };

        self.constraints.push(joint_handle);
        handle
    }

    fn body_transform(&self, body: BodyHandle) -> RigidTransform {
        self.body_slot(body)
            .and_then(|slot| self.rigid_body_set.get(slot.handle))
            .map(|rb| from_isometry(rb.position()))
            .unwrap_or_default()
    }

    fn set_body_transform(&mut self, body: BodyHandle, transform: RigidTransform) {
        if let Some(rb) = self.rigid_body_mut(body) {
            let pose = to_isometry(transform);
            rb.set_position(pose, true);
            if rb.is_kinematic() {
                rb.set_next_kinematic_position(pose);
            }
        }
    }

    fn set_kinematic_target(&mut self, body: BodyHandle, transform: RigidTransform) {
        if let Some(rb) = self.rigid_body_mut(body) {
            if rb.is_kinematic() {
                rb.set_next_kinematic_position(to_isometry(transform));
            }
        }
    }

    fn set_velocities(&mut self, body: BodyHandle, linear: Vec3, angular: Vec3) {
        if let Some(rb) = self.rigid_body_mut(body) {
            rb.set_linvel(vector![linear.x, linear.y, linear.z], true);
            rb.set_angvel(vector![angular.x, angular.y, angular.z], true);
        }
    }

    fn motion_type(&self, body: BodyHandle) -> MotionType {
        self.body_slot(body)
            .map(|slot| slot.motion_type)
            .unwrap_or(MotionType::Kinematic)
    }

    fn set_motion_type(&mut self, body: BodyHandle, motion_type: MotionType) {
        let Some(Some(slot)) = self.bodies.get_mut(body.0 as usize) else {
            return;
        };
        slot.motion_type = motion_type;
        let handle = slot.handle;
        if let Some(rb) = self.rigid_body_set.get_mut(handle) {
            let body_type = match motion_type {
                MotionType::Kinematic => RigidBodyType::KinematicPositionBased,
                MotionType::Dynamic => RigidBodyType::Dynamic,
            };
            rb.set_body_type(body_type, true);
        }
    }

    fn schedule_after_step(&mut self, action: AfterStepAction) -> bool {
        self.after_step.push(action)
    }

    /// 推进模拟
    ///
    /// 帧率足够高时全部使用固定步长；子步数超过上限时，
    /// 前 N-1 步用固定步长，最后一步消化剩余时间。
    fn step(&mut self, delta_time: f32) {
        if delta_time > 0.0 {
            let fixed_dt = 1.0 / self.config.physics_fps;
            let max_steps = self.config.max_substep_count.max(1);
            let needed_steps = (delta_time / fixed_dt).ceil() as u32;

            if needed_steps <= max_steps {
                let steps = needed_steps.max(1);
                let dt = delta_time / steps as f32;
                for _ in 0..steps {
                    self.step_once(dt);
                }
            } else {
                let fixed_steps = max_steps - 1;
                let remaining = delta_time - fixed_steps as f32 * fixed_dt;
                for _ in 0..fixed_steps {
                    self.step_once(fixed_dt);
                }
                self.step_once(remaining);
            }

            self.clamp_velocities();
        }

        self.run_after_step();
    }

    fn remove_constraint(&mut self, constraint: ConstraintHandle) {
        if let Some(Some(joint)) = self
            .constraints
            .get_mut(constraint.0 as usize)
            .map(Option::take)
        {
            self.impulse_joint_set.remove(joint, true);
        }
    }

    fn remove_shape(&mut self, shape: ShapeHandle) {
        let Some(slot) = self.shapes.get_mut(shape.0 as usize).and_then(Option::take) else {
            return;
        };
        if let Some(collider) = slot.collider {
            self.collider_set.remove(
                collider,
                &mut self.island_manager,
                &mut self.rigid_body_set,
                true,
            );
        }
    }

    fn remove_body(&mut self, body: BodyHandle) {
        let Some(slot) = self.bodies.get_mut(body.0 as usize).and_then(Option::take) else {
            return;
        };
        self.after_step.forget(body);
        self.rigid_body_set.remove(
            slot.handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        if let Some(Some(shape)) = self.shapes.get_mut(slot.shape.0 as usize) {
            // 碰撞体已随刚体移除
            shape.collider = None;
        }
    }
}

/// RigidTransform → Rapier Isometry
pub fn to_isometry(transform: RigidTransform) -> Isometry<Real> {
    let t = transform.translation;
    let r = transform.rotation;
    Isometry::from_parts(
        Translation3::new(t.x, t.y, t.z),
        UnitQuaternion::new_normalize(Quaternion::new(r.w, r.x, r.y, r.z)),
    )
}

/// Rapier Isometry → RigidTransform
pub fn from_isometry(iso: &Isometry<Real>) -> RigidTransform {
    let t = iso.translation.vector;
    let q = iso.rotation.coords;
    RigidTransform::new(Vec3::new(t.x, t.y, t.z), Quat::from_xyzw(q.x, q.y, q.z, q.w))
}
