//! 动画时钟
//!
//! 纯时间逻辑：帧时间推进、与音频时间对齐、时长统计。
//! 时间单位为 30fps 帧；对外的秒数都换算自帧时间。

use std::collections::HashMap;

use super::model::ModelId;

/// 帧时间单位
pub const FRAMES_PER_SECOND: f64 = 30.0;
/// 音频与动画相差小于此值（秒）视为同步
pub const SYNC_TOLERANCE: f64 = 0.05;
/// 相差超过此值（秒）直接跳到音频时间
pub const HARD_RESYNC_THRESHOLD: f64 = 0.5;
/// 动画领先音频时的推进系数
pub const AHEAD_CORRECTION: f64 = 0.9;
/// 动画落后音频时的推进系数
pub const BEHIND_CORRECTION: f64 = 1.1;
/// 跳转超过此帧数（2 秒）时物理需要重新初始化
pub const TELEPORT_FRAMES: f64 = 2.0 * FRAMES_PER_SECOND;

/// 参与时长统计的动画来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationSource {
    Model(ModelId),
    Camera,
}

/// 一次推进的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceOutcome {
    pub frame_time: f64,
    /// 与音频硬同步时跳转超过了阈值
    pub teleported: bool,
    /// 到达结尾，时钟已暂停
    pub reached_end: bool,
}

/// 一次跳转的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekOutcome {
    pub frame_time: f64,
    pub teleported: bool,
}

/// 动画时钟
#[derive(Debug, Clone)]
pub struct AnimationClock {
    current_frame_time: f64,
    time_scale: f64,
    paused: bool,
    frame_time_duration: f64,
    use_manual_duration: bool,
    animation_end_frames: HashMap<DurationSource, f64>,
    /// 音频时长（帧），未挂载音频时为 None
    audio_frame_duration: Option<f64>,
}

impl AnimationClock {
    pub fn new() -> Self {
        Self {
            current_frame_time: 0.0,
            time_scale: 1.0,
            paused: true,
            frame_time_duration: 0.0,
            use_manual_duration: false,
            animation_end_frames: HashMap::new(),
            audio_frame_duration: None,
        }
    }

    pub fn current_frame_time(&self) -> f64 {
        self.current_frame_time
    }

    /// 当前时间（秒）
    pub fn current_time(&self) -> f64 {
        self.current_frame_time / FRAMES_PER_SECOND
    }

    pub fn frame_time_duration(&self) -> f64 {
        self.frame_time_duration
    }

    /// 时长（秒）
    pub fn duration(&self) -> f64 {
        self.frame_time_duration / FRAMES_PER_SECOND
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, time_scale: f64) {
        self.time_scale = time_scale;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn uses_manual_duration(&self) -> bool {
        self.use_manual_duration
    }

    /// 开始播放，已在播放时返回 false
    pub fn start(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        self.paused = false;
        true
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// 把帧时间限制在 `[0, 时长]`
    pub fn clamp_frame_time(&self, frame_time: f64) -> f64 {
        frame_time.min(self.frame_time_duration).max(0.0)
    }

    /// 跳转到指定帧（限制在时长范围内）
    pub fn seek(&mut self, frame_time: f64) -> SeekOutcome {
        let frame_time = self.clamp_frame_time(frame_time);
        let teleported = TELEPORT_FRAMES < (frame_time - self.current_frame_time).abs();
        self.current_frame_time = frame_time;
        SeekOutcome {
            frame_time,
            teleported,
        }
    }

    /// 推进一帧
    ///
    /// # 参数
    /// - `delta_ms`: 经过的墙钟时间（毫秒）
    /// - `audio_time`: 正在播放的音频位置（秒），没有音频或音频暂停时为 None
    ///
    /// 暂停时返回 None。
    pub fn advance(&mut self, delta_ms: f64, audio_time: Option<f64>) -> Option<AdvanceOutcome> {
        if self.paused {
            return None;
        }

        let step = delta_ms / 1000.0 * FRAMES_PER_SECOND * self.time_scale;
        let mut teleported = false;

        match audio_time {
            Some(audio_time) => {
                let diff = audio_time - self.current_frame_time / FRAMES_PER_SECOND;
                let diff_abs = diff.abs();
                if diff_abs < SYNC_TOLERANCE {
                    self.current_frame_time += step;
                } else if diff_abs < HARD_RESYNC_THRESHOLD {
                    let correction = if diff < 0.0 {
                        AHEAD_CORRECTION
                    } else {
                        BEHIND_CORRECTION
                    };
                    self.current_frame_time += step * correction;
                } else {
                    let audio_frame_time = audio_time * FRAMES_PER_SECOND;
                    teleported = TELEPORT_FRAMES < (audio_frame_time - self.current_frame_time).abs();
                    self.current_frame_time = audio_frame_time;
                }
            }
            None => self.current_frame_time += step,
        }

        let mut reached_end = false;
        if self.frame_time_duration <= self.current_frame_time {
            self.paused = true;
            self.current_frame_time = self.frame_time_duration;
            reached_end = true;
        }

        Some(AdvanceOutcome {
            frame_time: self.current_frame_time,
            teleported,
            reached_end,
        })
    }

    /// 更新某个动画来源的结束帧（None 表示移除）
    ///
    /// 返回时长是否需要通知（手动时长模式下不统计）。
    pub fn set_animation_end_frame(&mut self, source: DurationSource, end_frame: Option<f64>) -> bool {
        match end_frame {
            Some(end) => self.animation_end_frames.insert(source, end),
            None => self.animation_end_frames.remove(&source),
        };
        if self.use_manual_duration {
            return false;
        }

        let new_duration = end_frame.unwrap_or(0.0);
        if self.frame_time_duration < new_duration {
            self.frame_time_duration = new_duration;
        } else if new_duration < self.frame_time_duration {
            self.frame_time_duration = self.compute_duration();
        }
        true
    }

    /// 更新音频时长（秒，None 表示卸下音频）
    pub fn set_audio_duration(&mut self, duration: Option<f64>) -> bool {
        self.audio_frame_duration = duration.map(|d| d * FRAMES_PER_SECOND);
        if self.use_manual_duration {
            return false;
        }

        let audio_frame_duration = self.audio_frame_duration.unwrap_or(0.0);
        if self.frame_time_duration < audio_frame_duration {
            self.frame_time_duration = audio_frame_duration;
        } else {
            self.frame_time_duration = self.compute_duration();
        }
        true
    }

    /// 设置手动时长（None 恢复自动统计），返回是否需要通知
    pub fn set_manual_duration(&mut self, frame_time_duration: Option<f64>) -> bool {
        match frame_time_duration {
            None if !self.use_manual_duration => false,
            None => {
                self.use_manual_duration = false;
                self.frame_time_duration = self.compute_duration();
                true
            }
            Some(duration) => {
                self.use_manual_duration = true;
                self.frame_time_duration = duration;
                true
            }
        }
    }

    /// 所有来源中最长的时长（帧）
    fn compute_duration(&self) -> f64 {
        self.animation_end_frames
            .values()
            .copied()
            .chain(self.audio_frame_duration)
            .fold(0.0, f64::max)
    }
}

impl Default for AnimationClock {
    fn default() -> Self {
        Self::new()
    }
}
