//! MMD Runtime - Rust 实现的 MMD 运行时核心
//!
//! 提供：
//! - 与音频同步的动画时钟（音频被拒绝自动播放时虚拟播放）
//! - 骨骼层级与变换传播
//! - 骨骼与物理引擎之间的刚体/关节桥接
//! - 基于 Rapier 的物理引擎实现

pub mod audio;
pub mod logger;
pub mod physics;
pub mod runtime;
pub mod skeleton;

pub use audio::{AudioPlayer, MediaClockSource, MediaEvent, SystemTimeSource, TimeSource};
pub use logger::{LogCrateLogger, Logger, NullLogger};
pub use physics::{
    DriveMode, JointDefinition, PhysicsCapability, PhysicsConfig, PhysicsModel,
    PhysicsModelBuilder, RapierPhysics, RigidBodyDefinition, ShapeType,
};
pub use runtime::{
    AnimationClock, CameraAnimation, CreateModelOptions, MmdModel, MmdRuntime, ModelAnimation,
    ModelId, Observable, ObserverId, RuntimeOptions,
};
pub use skeleton::{Bone, BoneHierarchy, BoneManager};

use thiserror::Error;

/// 物理模型构建错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Physics engine is not available")]
    EngineUnavailable,

    #[error("Physics engine mismatch: expected {expected}, found {found}")]
    EngineMismatch { expected: String, found: String },
}

/// 音频播放错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// 宿主拒绝自动播放
    #[error("Playback was not allowed")]
    NotAllowed,

    #[error("Audio source not supported: {0}")]
    NotSupported(String),

    #[error("Playback was aborted")]
    Aborted,

    #[error("Audio player was disposed")]
    Disposed,

    #[error("Playback error: {0}")]
    Other(String),
}

/// 运行时错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Physics build error: {0}")]
    Build(#[from] BuildError),

    #[error("Audio playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Model not found")]
    ModelNotFound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MmdError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

pub type Result<T> = std::result::Result<T, MmdError>;
