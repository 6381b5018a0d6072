//! 媒体时钟源接口
//!
//! 真实的音频元素（浏览器 audio、系统播放器等）实现 [`MediaClockSource`]。
//! 媒体事件是异步产生的，源把它们放进自己的队列，由
//! [`AudioPlayer::pump_media_events`](super::AudioPlayer::pump_media_events) 取出分发。

use futures::future::LocalBoxFuture;
use std::time::Instant;

use crate::PlaybackError;

/// 媒体元素产生的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// 元数据加载完成，时长可用
    DurationChanged,
    /// 加载失败
    Error,
    /// 开始播放
    Playing,
    Pause,
    /// 跳转完成
    Seeked,
}

/// 媒体时钟源
pub trait MediaClockSource {
    /// 请求播放
    ///
    /// 平台自动播放策略拒绝时返回 [`PlaybackError::NotAllowed`]。
    fn play(&mut self) -> LocalBoxFuture<'static, Result<(), PlaybackError>>;

    fn pause(&mut self);

    fn paused(&self) -> bool;

    /// 当前位置（秒）
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, value: f64);

    /// 时长（秒），未加载时为 0
    fn duration(&self) -> f64;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, value: f64);

    fn volume(&self) -> f64;

    fn set_volume(&mut self, value: f64);

    fn source(&self) -> String;

    fn set_source(&mut self, source: &str);

    /// 重新加载当前源
    fn load(&mut self);

    /// 取出自上次调用以来产生的事件
    fn take_events(&mut self) -> Vec<MediaEvent>;
}

/// 墙钟时间源（秒）
pub trait TimeSource {
    fn now(&self) -> f64;
}

/// 基于 `Instant` 的时间源
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
