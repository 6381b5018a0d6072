//! 音频播放器（虚拟播放）

use futures::channel::oneshot;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::source::{MediaClockSource, MediaEvent, SystemTimeSource, TimeSource};
use crate::runtime::observable::{Observable, ObserverId};
use crate::PlaybackError;

struct AudioState {
    duration: f64,
    playback_rate: f64,

    is_virtual: bool,
    virtual_start_time: f64,
    virtual_paused: bool,
    virtual_pause_current_time: f64,
    metadata_loaded: bool,

    /// 吞掉下一次 Seeked 事件（一次性标志，不是计数器）
    ignore_seeked_once: bool,
    play_request_blocking: bool,
}

impl AudioState {
    fn virtual_time(&self, now: f64) -> f64 {
        (now - self.virtual_start_time) * self.playback_rate
    }

    /// 从暂停位置开始虚拟播放
    fn resume_virtual_clock(&mut self, now: f64) {
        if self.virtual_paused {
            self.virtual_start_time = now - self.virtual_pause_current_time / self.playback_rate;
            self.virtual_paused = false;
        }
    }

    /// 回到真实播放模式，返回之前是否处于虚拟模式
    fn reset_virtual(&mut self) -> bool {
        let was_virtual = self.is_virtual;
        self.is_virtual = false;
        self.virtual_paused = true;
        self.virtual_pause_current_time = 0.0;
        was_virtual
    }
}

struct AudioShared {
    state: RefCell<AudioState>,
    source: RefCell<Option<Box<dyn MediaClockSource>>>,
    time: Rc<dyn TimeSource>,
    pumping: Cell<bool>,

    on_load_error: Observable,
    on_duration_changed: Observable,
    on_playback_rate_changed: Observable,
    on_mute_state_changed: Observable,
    on_play: Observable,
    on_pause: Observable,
    on_seek: Observable,
}

/// 音频播放器
///
/// 句柄可廉价克隆，所有克隆指向同一个播放器。
/// 事件回调总是在不持有内部借用的情况下调用，回调中可以再调用播放器。
#[derive(Clone)]
pub struct AudioPlayer {
    shared: Rc<AudioShared>,
}

impl AudioPlayer {
    pub fn new(source: Box<dyn MediaClockSource>, time: Rc<dyn TimeSource>) -> Self {
        let playback_rate = 1.0;
        let mut source = source;
        source.set_playback_rate(playback_rate);

        Self {
            shared: Rc::new(AudioShared {
                state: RefCell::new(AudioState {
                    duration: 0.0,
                    playback_rate,
                    is_virtual: false,
                    virtual_start_time: 0.0,
                    virtual_paused: true,
                    virtual_pause_current_time: 0.0,
                    metadata_loaded: false,
                    ignore_seeked_once: false,
                    play_request_blocking: false,
                }),
                source: RefCell::new(Some(source)),
                time,
                pumping: Cell::new(false),
                on_load_error: Observable::new(),
                on_duration_changed: Observable::new(),
                on_playback_rate_changed: Observable::new(),
                on_mute_state_changed: Observable::new(),
                on_play: Observable::new(),
                on_pause: Observable::new(),
                on_seek: Observable::new(),
            }),
        }
    }

    /// 使用系统时钟
    pub fn with_system_time(source: Box<dyn MediaClockSource>) -> Self {
        Self::new(source, Rc::new(SystemTimeSource::new()))
    }

    /// 两个句柄是否指向同一个播放器
    pub fn ptr_eq(a: &AudioPlayer, b: &AudioPlayer) -> bool {
        Rc::ptr_eq(&a.shared, &b.shared)
    }

    fn downgrade(&self) -> Weak<AudioShared> {
        Rc::downgrade(&self.shared)
    }

    fn now(&self) -> f64 {
        self.shared.time.now()
    }

    fn with_source<R>(&self, f: impl FnOnce(&mut dyn MediaClockSource) -> R) -> Option<R> {
        let mut source = self.shared.source.borrow_mut();
        source.as_mut().map(|s| f(s.as_mut()))
    }

    // ========== 事件通道 ==========

    pub fn on_load_error(&self) -> &Observable {
        &self.shared.on_load_error
    }

    pub fn on_duration_changed(&self) -> &Observable {
        &self.shared.on_duration_changed
    }

    pub fn on_playback_rate_changed(&self) -> &Observable {
        &self.shared.on_playback_rate_changed
    }

    pub fn on_mute_state_changed(&self) -> &Observable {
        &self.shared.on_mute_state_changed
    }

    pub fn on_play(&self) -> &Observable {
        &self.shared.on_play
    }

    pub fn on_pause(&self) -> &Observable {
        &self.shared.on_pause
    }

    pub fn on_seek(&self) -> &Observable {
        &self.shared.on_seek
    }

    // ========== 媒体事件 ==========

    /// 取出媒体源积压的事件并分发
    ///
    /// 分发过程中回调再次触发的事件会在同一次调用里继续处理。
    pub fn pump_media_events(&self) {
        if self.shared.pumping.replace(true) {
            return;
        }
        loop {
            let events = self.with_source(|s| s.take_events()).unwrap_or_default();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.dispatch_media_event(event);
            }
        }
        self.shared.pumping.set(false);
    }

    fn dispatch_media_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::DurationChanged => self.handle_duration_changed(),
            MediaEvent::Error => self.handle_load_error(),
            MediaEvent::Playing => self.handle_play(),
            MediaEvent::Pause => self.handle_pause(),
            MediaEvent::Seeked => self.handle_seek(),
        }
    }

    fn handle_duration_changed(&self) {
        let duration = self.with_source(|s| s.duration()).unwrap_or(0.0);
        let was_virtual = {
            let mut state = self.shared.state.borrow_mut();
            state.duration = duration;
            state.metadata_loaded = true;
            state.reset_virtual()
        };
        if was_virtual {
            self.shared.on_mute_state_changed.notify();
        }
        self.shared.on_duration_changed.notify();
    }

    fn handle_load_error(&self) {
        let was_virtual = {
            let mut state = self.shared.state.borrow_mut();
            state.duration = 0.0;
            state.metadata_loaded = false;
            state.reset_virtual()
        };
        if was_virtual {
            self.shared.on_mute_state_changed.notify();
        }
        self.shared.on_load_error.notify();
        self.shared.on_duration_changed.notify();
    }

    fn handle_play(&self) {
        let (is_virtual, rate) = {
            let state = self.shared.state.borrow();
            (state.is_virtual, state.playback_rate)
        };
        if !is_virtual {
            self.with_source(|s| s.set_playback_rate(rate));
        }
        self.shared.on_play.notify();
    }

    fn handle_pause(&self) {
        let notify = {
            let state = self.shared.state.borrow();
            !state.is_virtual || state.virtual_paused
        };
        if notify {
            self.shared.on_pause.notify();
        }
    }

    fn handle_seek(&self) {
        let ignored = {
            let mut state = self.shared.state.borrow_mut();
            std::mem::replace(&mut state.ignore_seeked_once, false)
        };
        if !ignored {
            self.shared.on_seek.notify();
        }
    }

    // ========== 属性 ==========

    /// 时长（秒）
    pub fn duration(&self) -> f64 {
        self.shared.state.borrow().duration
    }

    /// 当前位置（秒）
    ///
    /// 虚拟播放时按墙钟推算，超过时长会自动暂停并返回时长。
    pub fn current_time(&self) -> f64 {
        let now = self.now();
        let (is_virtual, reached_end, time) = {
            let mut state = self.shared.state.borrow_mut();
            if !state.is_virtual {
                (false, false, 0.0)
            } else if state.virtual_paused {
                (true, false, state.virtual_pause_current_time)
            } else {
                let computed = state.virtual_time(now);
                if computed > state.duration {
                    state.virtual_paused = true;
                    state.virtual_pause_current_time = state.duration;
                    (true, true, state.duration)
                } else {
                    (true, false, computed)
                }
            }
        };

        if !is_virtual {
            return self.with_source(|s| s.current_time()).unwrap_or(0.0);
        }
        if reached_end {
            self.handle_pause();
        }
        time
    }

    /// 跳转（触发 seek 事件）
    pub fn set_current_time(&self, value: f64) {
        if self.reseed_virtual(value) {
            self.handle_seek();
        } else {
            self.with_source(|s| s.set_current_time(value));
            self.pump_media_events();
        }
    }

    /// 跳转但不触发 seek 事件
    ///
    /// 真实播放时媒体元素仍会异步产生一次 Seeked 事件，这里标记吞掉它。
    pub fn set_current_time_without_notify(&self, value: f64) {
        if self.reseed_virtual(value) {
            return;
        }
        self.shared.state.borrow_mut().ignore_seeked_once = true;
        self.with_source(|s| s.set_current_time(value));
        self.pump_media_events();
    }

    /// 虚拟模式下重设位置，返回是否处于虚拟模式
    fn reseed_virtual(&self, value: f64) -> bool {
        let now = self.now();
        let mut state = self.shared.state.borrow_mut();
        if !state.is_virtual {
            return false;
        }
        if state.virtual_paused {
            state.virtual_pause_current_time = value;
        } else {
            state.virtual_start_time = now - value / state.playback_rate;
        }
        true
    }

    pub fn volume(&self) -> f64 {
        self.with_source(|s| s.volume()).unwrap_or(0.0)
    }

    pub fn set_volume(&self, value: f64) {
        self.with_source(|s| s.set_volume(value));
    }

    /// 是否处于虚拟播放（静音）模式
    pub fn muted(&self) -> bool {
        self.shared.state.borrow().is_virtual
    }

    /// 强制进入虚拟播放模式
    pub fn mute(&self) {
        let now = self.now();
        let entered = {
            let mut state = self.shared.state.borrow_mut();
            if state.is_virtual {
                false
            } else {
                let mut source = self.shared.source.borrow_mut();
                match source.as_mut() {
                    None => false,
                    Some(source) => {
                        let current_time = source.current_time();
                        state.is_virtual = true;
                        state.virtual_start_time = now - current_time / state.playback_rate;
                        state.virtual_paused = source.paused();
                        state.virtual_pause_current_time = current_time;
                        source.pause();
                        true
                    }
                }
            }
        };

        if entered {
            self.shared.on_mute_state_changed.notify();
            self.pump_media_events();
        }
    }

    /// 尝试从虚拟播放恢复真实播放
    ///
    /// 返回是否成功；自动播放再次被拒绝时返回 `Ok(false)`，仍保持虚拟模式。
    pub async fn unmute(&self) -> Result<bool, PlaybackError> {
        let now = self.now();
        let play = {
            let mut state = self.shared.state.borrow_mut();
            let mut source = self.shared.source.borrow_mut();
            let Some(source) = source.as_mut() else {
                return Ok(false);
            };
            if !state.is_virtual {
                return Ok(true);
            }

            state.ignore_seeked_once = true;
            if state.virtual_paused {
                source.set_current_time(state.virtual_pause_current_time);
                None
            } else {
                source.set_current_time(state.virtual_time(now));
                Some(source.play())
            }
        };

        if let Some(play) = play {
            match play.await {
                Ok(()) => {
                    let rate = self.shared.state.borrow().playback_rate;
                    self.with_source(|s| s.set_playback_rate(rate));
                }
                Err(PlaybackError::NotAllowed) => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        self.shared.state.borrow_mut().reset_virtual();
        self.shared.on_mute_state_changed.notify();
        self.pump_media_events();
        Ok(true)
    }

    pub fn playback_rate(&self) -> f64 {
        self.shared.state.borrow().playback_rate
    }

    /// 设置播放速率并通知
    pub fn set_playback_rate(&self, value: f64) {
        self.set_playback_rate_without_notify(value);
        self.shared.on_playback_rate_changed.notify();
    }

    /// 设置播放速率（不通知，用于动画时钟改变时间缩放时避免回环）
    pub fn set_playback_rate_without_notify(&self, value: f64) {
        let now = self.now();
        {
            let mut state = self.shared.state.borrow_mut();
            if state.is_virtual && !state.virtual_paused {
                let current_time = state.virtual_time(now);
                state.virtual_start_time = now - current_time / value;
            }
            state.playback_rate = value;
        }
        self.with_source(|s| s.set_playback_rate(value));
    }

    pub fn paused(&self) -> bool {
        let virtual_paused = {
            let state = self.shared.state.borrow();
            state.is_virtual.then_some(state.virtual_paused)
        };
        match virtual_paused {
            Some(paused) => paused,
            None => self.with_source(|s| s.paused()).unwrap_or(true),
        }
    }

    pub fn source(&self) -> String {
        self.with_source(|s| s.source()).unwrap_or_default()
    }

    /// 切换音频源（重置虚拟播放状态并重新加载）
    pub fn set_source(&self, value: &str) {
        let changed = self
            .with_source(|s| {
                if s.source() == value {
                    return false;
                }
                s.set_source(value);
                true
            })
            .unwrap_or(false);
        if !changed {
            return;
        }

        let was_virtual = {
            let mut state = self.shared.state.borrow_mut();
            state.metadata_loaded = false;
            state.reset_virtual()
        };
        if was_virtual {
            self.shared.on_mute_state_changed.notify();
        }

        self.with_source(|s| s.load());
        self.pump_media_events();
    }

    /// 元数据是否已加载
    pub fn metadata_loaded(&self) -> bool {
        self.shared.state.borrow().metadata_loaded
    }

    // ========== 播放控制 ==========

    /// 开始虚拟播放并发出播放通知
    fn start_virtual_playback(&self) {
        let now = self.now();
        let entered = {
            let mut state = self.shared.state.borrow_mut();
            state.resume_virtual_clock(now);
            !std::mem::replace(&mut state.is_virtual, true)
        };
        if entered {
            self.shared.on_mute_state_changed.notify();
        }
        self.handle_play();
    }

    /// 虚拟播放；元数据未加载时等待时长变化或加载失败
    async fn virtual_play(&self) -> Result<(), PlaybackError> {
        if self.metadata_loaded() {
            self.start_virtual_playback();
            return Ok(());
        }

        let (sender, receiver) = oneshot::channel::<Result<(), PlaybackError>>();
        let sender = Rc::new(RefCell::new(Some(sender)));
        let duration_id: Rc<Cell<Option<ObserverId>>> = Rc::new(Cell::new(None));
        let error_id: Rc<Cell<Option<ObserverId>>> = Rc::new(Cell::new(None));

        {
            let weak = self.downgrade();
            let sender = sender.clone();
            let error_id = error_id.clone();
            let id = self.shared.on_duration_changed.add_once(move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let player = AudioPlayer { shared };
                player.start_virtual_playback();
                if let Some(id) = error_id.take() {
                    player.shared.on_load_error.remove(id);
                }
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send(Ok(()));
                }
            });
            duration_id.set(Some(id));
        }
        {
            let weak = self.downgrade();
            let sender = sender.clone();
            let duration_id = duration_id.clone();
            let id = self.shared.on_load_error.add_once(move || {
                if let Some(shared) = weak.upgrade() {
                    if let Some(id) = duration_id.take() {
                        shared.on_duration_changed.remove(id);
                    }
                }
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send(Err(PlaybackError::NotSupported(
                        "the media resource was not suitable".to_string(),
                    )));
                }
            });
            error_id.set(Some(id));
        }

        // 播放器被释放时监听者被清空，发送端随之丢弃
        drop(sender);
        receiver.await.unwrap_or(Err(PlaybackError::Disposed))
    }

    /// 播放
    ///
    /// 平台禁止自动播放时转为虚拟播放，不向调用者报告；其他错误原样返回。
    pub async fn play(&self) -> Result<(), PlaybackError> {
        let (is_virtual, virtual_paused, blocking) = {
            let state = self.shared.state.borrow();
            (state.is_virtual, state.virtual_paused, state.play_request_blocking)
        };
        if is_virtual && !virtual_paused {
            return Ok(());
        }
        if is_virtual {
            return self.virtual_play().await;
        }
        if blocking {
            return Ok(());
        }

        let Some(play) = self.with_source(|s| s.play()) else {
            return Ok(());
        };
        self.shared.state.borrow_mut().play_request_blocking = true;

        let result = match play.await {
            Ok(()) => {
                self.pump_media_events();
                Ok(())
            }
            Err(PlaybackError::NotAllowed) => self.virtual_play().await,
            Err(e) => Err(e),
        };

        self.shared.state.borrow_mut().play_request_blocking = false;
        result
    }

    /// 暂停
    pub fn pause(&self) {
        let now = self.now();
        let paused_virtual = {
            let mut state = self.shared.state.borrow_mut();
            if !state.is_virtual {
                None
            } else if state.virtual_paused {
                Some(false)
            } else {
                state.virtual_paused = true;
                state.virtual_pause_current_time = state.virtual_time(now);
                Some(true)
            }
        };

        match paused_virtual {
            Some(true) => self.handle_pause(),
            Some(false) => {}
            None => {
                self.with_source(|s| s.pause());
                self.pump_media_events();
            }
        }
    }

    /// 释放媒体源并清空所有事件通道
    pub fn dispose(&self) {
        let Some(mut source) = self.shared.source.borrow_mut().take() else {
            return;
        };
        source.pause();
        source.set_source("");
        source.load();
        drop(source);

        let shared = &self.shared;
        shared.on_load_error.clear();
        shared.on_duration_changed.clear();
        shared.on_playback_rate_changed.clear();
        shared.on_mute_state_changed.clear();
        shared.on_play.clear();
        shared.on_pause.clear();
        shared.on_seek.clear();
    }

    /// 是否已释放
    pub fn is_disposed(&self) -> bool {
        self.shared.source.borrow().is_none()
    }
}

impl std::fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("AudioPlayer")
            .field("duration", &state.duration)
            .field("is_virtual", &state.is_virtual)
            .field("virtual_paused", &state.virtual_paused)
            .field("metadata_loaded", &state.metadata_loaded)
            .finish()
    }
}
