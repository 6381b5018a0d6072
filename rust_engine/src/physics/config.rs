//! 物理配置
//!
//! 所有参数扁平化，运行时通过 `set_config` 整体替换。

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 物理配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    // ========== 重力 ==========
    /// 重力 Y 分量（负数向下）
    pub gravity_y: f32,

    // ========== 模拟参数 ==========
    /// 物理 FPS（固定步长 = 1 / physics_fps）
    pub physics_fps: f32,
    /// 每帧最大子步数
    pub max_substep_count: u32,
    /// 求解器迭代次数
    pub solver_iterations: usize,
    /// 内部 PGS 迭代次数
    pub pgs_iterations: usize,
    /// 最大修正速度
    pub max_corrective_velocity: f32,

    // ========== 刚体 ==========
    /// 线性阻尼缩放（乘以定义中的原值）
    pub linear_damping_scale: f32,
    /// 角速度阻尼缩放
    pub angular_damping_scale: f32,
    /// 把 Bullet 风格的阻尼（每步衰减比例）换算为连续阻尼系数
    pub convert_bullet_damping: bool,
    /// 质量缩放
    pub mass_scale: f32,

    // ========== 关节弹簧 ==========
    /// 线性弹簧刚度缩放
    pub linear_spring_stiffness_scale: f32,
    /// 角度弹簧刚度缩放
    pub angular_spring_stiffness_scale: f32,
    /// 线性弹簧阻尼系数，damping = sqrt(stiffness * 此值)
    pub linear_spring_damping_factor: f32,
    /// 角度弹簧阻尼系数
    pub angular_spring_damping_factor: f32,
    /// 绝对值小于此阈值（弧度）的角度限制视为 0
    pub angular_limit_clamp_threshold: f32,

    // ========== 速度限制 ==========
    /// 最大线速度
    pub max_linear_velocity: f32,
    /// 最大角速度 (rad/s)
    pub max_angular_velocity: f32,

    // ========== 调试 ==========
    /// 是否启用关节
    pub joints_enabled: bool,
    /// 是否输出调试日志
    pub debug_log: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            // MMD 标准重力
            gravity_y: -98.0,

            physics_fps: 60.0,
            // 帧率过低时最多分几步，超出部分由最后一步消化
            max_substep_count: 5,
            solver_iterations: 8,
            pgs_iterations: 2,
            max_corrective_velocity: 10.0,

            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            convert_bullet_damping: true,
            mass_scale: 1.0,

            linear_spring_stiffness_scale: 1.0,
            angular_spring_stiffness_scale: 1.0,
            linear_spring_damping_factor: 1.0,
            angular_spring_damping_factor: 1.0,
            // 5 度
            angular_limit_clamp_threshold: 5.0_f32.to_radians(),

            // 速度限制只防止穿模导致的爆炸
            max_linear_velocity: 500.0,
            max_angular_velocity: 60.0,

            joints_enabled: true,
            debug_log: false,
        }
    }
}

/// 全局配置实例
static PHYSICS_CONFIG: Lazy<RwLock<PhysicsConfig>> =
    Lazy::new(|| RwLock::new(PhysicsConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> PhysicsConfig {
    PHYSICS_CONFIG.read().clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: PhysicsConfig) {
    *PHYSICS_CONFIG.write() = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *PHYSICS_CONFIG.write() = PhysicsConfig::default();
}

/// 读写全局配置的测试互相串行
#[cfg(test)]
pub(crate) static CONFIG_TEST_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
