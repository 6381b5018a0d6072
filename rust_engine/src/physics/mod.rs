//! 物理桥接模块
//!
//! 把骨骼层级和物理引擎连接起来：
//! - 构建：刚体/关节定义 → 引擎中的刚体和约束（[`PhysicsModelBuilder`]）
//! - 同步：每帧在物理步进前后做骨骼 ↔ 刚体变换同步（[`PhysicsModel`]）
//!
//! 引擎本身藏在 [`PhysicsCapability`] 之后，默认实现为 Rapier3D。
//!
//! ## 驱动模式
//! | 模式 | 步进前 | 步进后 |
//! |------|--------|--------|
//! | BoneFollowing | 骨骼 → 刚体（运动学目标） | 无 |
//! | Dynamic | 无 | 刚体 → 骨骼 |
//! | DynamicFollowsBone | 无 | 刚体旋转 + 骨骼自身位置 → 骨骼 |

mod builder;
pub mod capability;
pub mod config;
pub mod definition;
mod model;
mod rapier;

pub use builder::PhysicsModelBuilder;
pub use capability::{
    AfterStepAction, AfterStepQueue, BodyDesc, BodyHandle, ConstraintDesc, ConstraintHandle,
    MotionType, PhysicsCapability, RigidTransform, ShapeDesc, ShapeHandle, ShapeKind,
};
pub use config::{get_config, reset_config, set_config, PhysicsConfig};
pub use definition::{DriveMode, JointDefinition, RigidBodyDefinition, ShapeType};
pub use model::{PhysicsModel, PhysicsNode};
pub use rapier::RapierPhysics;
