//! 骨骼系统

mod bone;
mod hierarchy;
mod manager;

pub use bone::Bone;
pub use hierarchy::{compute_bone_depths, BoneHierarchy};
pub use manager::BoneManager;
