//! 音频播放器
//!
//! 在平台禁止自动播放时切换到虚拟播放：不出声，但按墙钟推算出可信的播放位置，
//! 让动画时钟照常与之同步。

mod player;
mod source;

pub use player::AudioPlayer;
pub use source::{MediaClockSource, MediaEvent, SystemTimeSource, TimeSource};
