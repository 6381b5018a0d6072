//! MMD 运行时
//!
//! 持有动画时钟、模型、相机和物理引擎，并把时钟与可选的音频播放器对齐。
//!
//! ## 每帧调用顺序
//! 1. [`MmdRuntime::before_physics`]：推进时钟 → 求值动画 → 骨骼 → 刚体
//! 2. [`MmdRuntime::step_physics`]：物理步进
//! 3. [`MmdRuntime::after_physics`]：刚体 → 骨骼
//!
//! 单线程模型：运行时句柄是 `Rc`，异步操作（播放、跳转、挂载音频）只在
//! 等待音频时挂起，恢复后用世代计数判断请求是否已经过期。

pub mod clock;
mod model;
pub mod observable;

use futures::task::{LocalSpawn, LocalSpawnExt};
use glam::Mat4;
use slotmap::SlotMap;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::audio::AudioPlayer;
use crate::logger::{LogCrateLogger, Logger, NullLogger};
use crate::physics::{JointDefinition, PhysicsCapability, PhysicsModelBuilder, RigidBodyDefinition};
use crate::skeleton::BoneManager;
use crate::RuntimeError;

pub use clock::{AnimationClock, DurationSource, FRAMES_PER_SECOND};
pub use model::{CameraAnimation, MmdModel, ModelAnimation, ModelId};
pub use observable::{Observable, ObserverId};

/// 运行时选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// 从第 0 帧开始播放时重新初始化物理
    pub auto_physics_initialization: bool,
    /// 创建模型时默认是否构建物理
    pub build_physics: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            auto_physics_initialization: true,
            build_physics: true,
        }
    }
}

/// 创建模型的选项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateModelOptions {
    /// 覆盖 [`RuntimeOptions::build_physics`]
    pub build_physics: Option<bool>,
    pub root_transform: Mat4,
}

impl Default for CreateModelOptions {
    fn default() -> Self {
        Self {
            build_physics: None,
            root_transform: Mat4::IDENTITY,
        }
    }
}

struct AttachedAudio {
    player: AudioPlayer,
    duration_changed: ObserverId,
    playback_rate_changed: ObserverId,
    play: ObserverId,
    pause: ObserverId,
    seek: ObserverId,
}

impl AttachedAudio {
    fn detach(self) -> AudioPlayer {
        let player = self.player;
        player.on_duration_changed().remove(self.duration_changed);
        player.on_playback_rate_changed().remove(self.playback_rate_changed);
        player.on_play().remove(self.play);
        player.on_pause().remove(self.pause);
        player.on_seek().remove(self.seek);
        player
    }
}

struct RuntimeState {
    clock: AnimationClock,
    models: SlotMap<ModelId, MmdModel>,
    camera: Option<Box<dyn CameraAnimation>>,
    physics: Option<Box<dyn PhysicsCapability>>,
    audio: Option<AttachedAudio>,
    /// 每次调用 set_audio_player 递增，异步等待恢复后用来判断挂载是否已变更
    audio_generation: u64,
    /// 播放、暂停请求递增，等待中的音频播放据此判断是否已被取代
    play_generation: u64,
    audio_plays_in_flight: u32,
    /// 等待期间动画被暂停：迟到的音频播放事件不再启动时钟
    audio_play_cancelled: bool,
    needs_physics_init: HashSet<ModelId>,
    logger: Rc<dyn Logger>,
    logging_enabled: bool,
    options: RuntimeOptions,
}

fn physics_slot(physics: &mut Option<Box<dyn PhysicsCapability>>) -> Option<&mut dyn PhysicsCapability> {
    match physics {
        Some(physics) => Some(&mut **physics),
        None => None,
    }
}

impl RuntimeState {
    fn physics_mut(&mut self) -> Option<&mut dyn PhysicsCapability> {
        physics_slot(&mut self.physics)
    }

    /// 标记所有带动画的模型需要重新初始化物理
    fn mark_animated_models(&mut self) {
        for (id, model) in self.models.iter() {
            if model.has_animation() {
                self.needs_physics_init.insert(id);
            }
        }
    }
}

/// 等待音频播放结束后请求的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioPlayRequest {
    Current,
    /// 等待期间有新的播放或暂停请求
    Superseded,
    /// 等待期间播放器被卸下或替换
    Detached,
}

struct RuntimeShared {
    state: RefCell<RuntimeState>,
    spawner: RefCell<Option<Box<dyn LocalSpawn>>>,

    on_animation_duration_changed: Observable,
    on_play_animation: Observable,
    on_pause_animation: Observable,
    on_seek_animation: Observable,
    on_animation_tick: Observable,
}

/// MMD 运行时
///
/// 句柄可廉价克隆。事件回调调用时运行时不持有内部借用。
#[derive(Clone)]
pub struct MmdRuntime {
    shared: Rc<RuntimeShared>,
}

impl MmdRuntime {
    pub fn new(physics: Option<Box<dyn PhysicsCapability>>, options: RuntimeOptions) -> Self {
        Self {
            shared: Rc::new(RuntimeShared {
                state: RefCell::new(RuntimeState {
                    clock: AnimationClock::new(),
                    models: SlotMap::with_key(),
                    camera: None,
                    physics,
                    audio: None,
                    audio_generation: 0,
                    play_generation: 0,
                    audio_plays_in_flight: 0,
                    audio_play_cancelled: false,
                    needs_physics_init: HashSet::new(),
                    logger: Rc::new(NullLogger),
                    logging_enabled: false,
                    options,
                }),
                spawner: RefCell::new(None),
                on_animation_duration_changed: Observable::new(),
                on_play_animation: Observable::new(),
                on_pause_animation: Observable::new(),
                on_seek_animation: Observable::new(),
                on_animation_tick: Observable::new(),
            }),
        }
    }

    fn downgrade(&self) -> Weak<RuntimeShared> {
        Rc::downgrade(&self.shared)
    }

    fn upgrade(weak: &Weak<RuntimeShared>) -> Option<MmdRuntime> {
        weak.upgrade().map(|shared| MmdRuntime { shared })
    }

    fn logger(&self) -> Rc<dyn Logger> {
        self.shared.state.borrow().logger.clone()
    }

    /// 开始等待音频播放，返回 (挂载世代, 播放世代)
    fn begin_audio_play(&self) -> (u64, u64) {
        let mut state = self.shared.state.borrow_mut();
        state.audio_plays_in_flight += 1;
        (state.audio_generation, state.play_generation)
    }

    /// 播放请求发出前调用：取代所有正在等待的请求
    fn supersede_audio_plays(&self, cancel: bool) {
        let mut state = self.shared.state.borrow_mut();
        state.play_generation += 1;
        state.audio_play_cancelled = cancel && 0 < state.audio_plays_in_flight;
    }

    /// 音频播放等待结束
    ///
    /// 过期的请求会暂停播放器：播放器已卸下，或动画在等待期间被暂停。
    fn finish_audio_play(&self, player: &AudioPlayer, generations: (u64, u64)) -> AudioPlayRequest {
        let (request, pause_player) = {
            let mut state = self.shared.state.borrow_mut();
            state.audio_plays_in_flight = state.audio_plays_in_flight.saturating_sub(1);
            if state.audio_plays_in_flight == 0 {
                state.audio_play_cancelled = false;
            }
            if state.audio_generation != generations.0 {
                (AudioPlayRequest::Detached, true)
            } else if state.play_generation != generations.1 {
                (AudioPlayRequest::Superseded, state.clock.is_paused())
            } else {
                (AudioPlayRequest::Current, false)
            }
        };
        if pause_player {
            player.pause();
        }
        request
    }

    /// 设置后台任务执行器（音频时长变化后重新播放需要它）
    pub fn set_spawner(&self, spawner: impl LocalSpawn + 'static) {
        *self.shared.spawner.borrow_mut() = Some(Box::new(spawner));
    }

    // ========== 日志 ==========

    pub fn logging_enabled(&self) -> bool {
        self.shared.state.borrow().logging_enabled
    }

    /// 开关日志（开启时转发到 `log` crate）
    pub fn set_logging_enabled(&self, enabled: bool) {
        let mut state = self.shared.state.borrow_mut();
        state.logging_enabled = enabled;
        state.logger = if enabled {
            Rc::new(LogCrateLogger)
        } else {
            Rc::new(NullLogger)
        };
    }

    /// 使用自定义日志实现
    pub fn set_logger(&self, logger: Rc<dyn Logger>) {
        let mut state = self.shared.state.borrow_mut();
        state.logging_enabled = true;
        state.logger = logger;
    }

    // ========== 事件通道 ==========

    pub fn on_animation_duration_changed(&self) -> &Observable {
        &self.shared.on_animation_duration_changed
    }

    pub fn on_play_animation(&self) -> &Observable {
        &self.shared.on_play_animation
    }

    pub fn on_pause_animation(&self) -> &Observable {
        &self.shared.on_pause_animation
    }

    pub fn on_seek_animation(&self) -> &Observable {
        &self.shared.on_seek_animation
    }

    pub fn on_animation_tick(&self) -> &Observable {
        &self.shared.on_animation_tick
    }

    // ========== 模型 ==========

    /// 创建模型，按选项构建物理
    ///
    /// 物理引擎不可用时返回错误；单个刚体或关节的问题只记录警告。
    pub fn create_model(
        &self,
        name: &str,
        skeleton: BoneManager,
        rigid_bodies: &[RigidBodyDefinition],
        joints: &[JointDefinition],
        options: CreateModelOptions,
    ) -> Result<ModelId, RuntimeError> {
        let mut state = self.shared.state.borrow_mut();
        let build_physics = options.build_physics.unwrap_or(state.options.build_physics);
        let logger = state.logger.clone();

        let physics_model = match state.physics_mut() {
            Some(physics) if build_physics => Some(PhysicsModelBuilder::new(logger.as_ref()).build(
                options.root_transform,
                &skeleton,
                rigid_bodies,
                joints,
                physics,
            )?),
            _ => None,
        };

        let id = state
            .models
            .insert(MmdModel::new(name.to_string(), skeleton, physics_model));
        state.needs_physics_init.insert(id);
        Ok(id)
    }

    /// 销毁模型并释放其物理资源
    pub fn destroy_model(&self, id: ModelId) -> Result<(), RuntimeError> {
        let notify = {
            let mut state = self.shared.state.borrow_mut();
            let mut model = state.models.remove(id).ok_or(RuntimeError::ModelNotFound)?;
            model.dispose(state.physics_mut());
            state.needs_physics_init.remove(&id);
            state
                .clock
                .set_animation_end_frame(DurationSource::Model(id), None)
        };
        if notify {
            self.shared.on_animation_duration_changed.notify();
        }
        Ok(())
    }

    /// 设置模型的当前动画
    pub fn set_model_animation(
        &self,
        id: ModelId,
        animation: Option<Box<dyn ModelAnimation>>,
    ) -> Result<(), RuntimeError> {
        let notify = {
            let mut state = self.shared.state.borrow_mut();
            let model = state.models.get_mut(id).ok_or(RuntimeError::ModelNotFound)?;
            model.set_animation(animation);
            let end_frame = model.animation_end_frame();
            state
                .clock
                .set_animation_end_frame(DurationSource::Model(id), end_frame)
        };
        if notify {
            self.shared.on_animation_duration_changed.notify();
        }
        Ok(())
    }

    /// 访问模型
    pub fn with_model<R>(&self, id: ModelId, f: impl FnOnce(&MmdModel) -> R) -> Option<R> {
        self.shared.state.borrow().models.get(id).map(f)
    }

    /// 可变访问模型
    pub fn with_model_mut<R>(&self, id: ModelId, f: impl FnOnce(&mut MmdModel) -> R) -> Option<R> {
        self.shared.state.borrow_mut().models.get_mut(id).map(f)
    }

    /// 访问物理引擎
    pub fn with_physics<R>(&self, f: impl FnOnce(&mut dyn PhysicsCapability) -> R) -> Option<R> {
        self.shared.state.borrow_mut().physics_mut().map(f)
    }

    pub fn model_count(&self) -> usize {
        self.shared.state.borrow().models.len()
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        self.shared.state.borrow().models.keys().collect()
    }

    /// 设置相机动画（None 移除）
    pub fn set_camera(&self, camera: Option<Box<dyn CameraAnimation>>) {
        let notify = {
            let mut state = self.shared.state.borrow_mut();
            let end_frame = camera.as_ref().map(|c| c.end_frame());
            state.camera = camera;
            state
                .clock
                .set_animation_end_frame(DurationSource::Camera, end_frame)
        };
        if notify {
            self.shared.on_animation_duration_changed.notify();
        }
    }

    pub fn has_camera(&self) -> bool {
        self.shared.state.borrow().camera.is_some()
    }

    // ========== 音频 ==========

    pub fn audio_player(&self) -> Option<AudioPlayer> {
        self.shared
            .state
            .borrow()
            .audio
            .as_ref()
            .map(|a| a.player.clone())
    }

    /// 卸下当前音频播放器（移除监听并暂停）
    fn detach_audio(&self) {
        let attached = self.shared.state.borrow_mut().audio.take();
        if let Some(attached) = attached {
            let player = attached.detach();
            player.pause();
        }
    }

    /// 挂载音频播放器（None 卸下）
    ///
    /// 动画正在播放时先把音频跳到动画位置并等待播放；
    /// 等待期间又挂载了别的播放器时，暂停这个播放器并放弃挂载。
    pub async fn set_audio_player(&self, audio_player: Option<AudioPlayer>) {
        let current = self.audio_player();
        let unchanged = match (&current, &audio_player) {
            (Some(a), Some(b)) => AudioPlayer::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        self.shared.state.borrow_mut().audio_generation += 1;

        self.detach_audio();
        let notify = self.shared.state.borrow_mut().clock.set_audio_duration(None);
        if notify {
            self.shared.on_animation_duration_changed.notify();
        }

        let Some(player) = audio_player else {
            return;
        };

        let (paused, frame_time) = {
            let state = self.shared.state.borrow();
            (state.clock.is_paused(), state.clock.current_frame_time())
        };
        if !paused && frame_time < player.duration() * FRAMES_PER_SECOND {
            player.set_current_time(frame_time / FRAMES_PER_SECOND);
            let generations = self.begin_audio_play();
            let result = player.play().await;
            match self.finish_audio_play(&player, generations) {
                AudioPlayRequest::Detached => return,
                // 等待期间动画被暂停时播放器已停下，照常挂载
                AudioPlayRequest::Superseded => {}
                AudioPlayRequest::Current => {
                    if let Err(e) = result {
                        self.logger().error(&format!("Failed to play audio: {}", e));
                    }
                }
            }
        }

        self.attach_audio(player);
    }

    fn attach_audio(&self, player: AudioPlayer) {
        let weak = self.downgrade();
        let duration_changed = player.on_duration_changed().add({
            let weak = weak.clone();
            move || {
                if let Some(runtime) = MmdRuntime::upgrade(&weak) {
                    runtime.handle_audio_duration_changed();
                }
            }
        });
        let playback_rate_changed = player.on_playback_rate_changed().add({
            let weak = weak.clone();
            move || {
                if let Some(runtime) = MmdRuntime::upgrade(&weak) {
                    runtime.handle_audio_playback_rate_changed();
                }
            }
        });
        let play = player.on_play().add({
            let weak = weak.clone();
            move || {
                if let Some(runtime) = MmdRuntime::upgrade(&weak) {
                    runtime.handle_audio_play();
                }
            }
        });
        let pause = player.on_pause().add({
            let weak = weak.clone();
            move || {
                if let Some(runtime) = MmdRuntime::upgrade(&weak) {
                    runtime.handle_audio_pause();
                }
            }
        });
        let seek = player.on_seek().add(move || {
            if let Some(runtime) = MmdRuntime::upgrade(&weak) {
                runtime.handle_audio_seek();
            }
        });

        let time_scale = {
            let mut state = self.shared.state.borrow_mut();
            state.audio = Some(AttachedAudio {
                player: player.clone(),
                duration_changed,
                playback_rate_changed,
                play,
                pause,
                seek,
            });
            state.clock.time_scale()
        };

        self.handle_audio_duration_changed();
        player.set_playback_rate_without_notify(time_scale);
    }

    /// 音频时长变化：播放中则把音频对齐到动画位置重新播放，然后更新总时长
    fn handle_audio_duration_changed(&self) {
        let Some(player) = self.audio_player() else {
            return;
        };

        let (paused, current_time) = {
            let state = self.shared.state.borrow();
            (state.clock.is_paused(), state.clock.current_time())
        };
        if !paused && current_time < player.duration() {
            player.set_current_time_without_notify(current_time);
            if player.paused() {
                self.spawn_audio_play(player.clone());
            }
        }

        let notify = self
            .shared
            .state
            .borrow_mut()
            .clock
            .set_audio_duration(Some(player.duration()));
        if notify {
            self.shared.on_animation_duration_changed.notify();
        }
    }

    /// 在后台播放音频，完成后若挂载已变更则暂停
    fn spawn_audio_play(&self, player: AudioPlayer) {
        let weak = self.downgrade();
        let generations = self.begin_audio_play();
        let task = async move {
            let result = player.play().await;
            let Some(runtime) = MmdRuntime::upgrade(&weak) else {
                return;
            };
            if runtime.finish_audio_play(&player, generations) != AudioPlayRequest::Current {
                return;
            }
            if let Err(e) = result {
                runtime
                    .logger()
                    .error(&format!("Failed to play audio: {}", e));
            }
        };

        let spawner = self.shared.spawner.borrow();
        let spawned = spawner
            .as_ref()
            .map(|spawner| spawner.spawn_local(task).is_ok())
            .unwrap_or(false);
        drop(spawner);
        if !spawned {
            let mut state = self.shared.state.borrow_mut();
            state.audio_plays_in_flight = state.audio_plays_in_flight.saturating_sub(1);
            drop(state);
            self.logger()
                .warn("No spawner available, audio playback was not resumed");
        }
    }

    fn handle_audio_playback_rate_changed(&self) {
        if let Some(player) = self.audio_player() {
            let rate = player.playback_rate();
            self.shared.state.borrow_mut().clock.set_time_scale(rate);
        }
    }

    fn handle_audio_pause(&self) {
        let Some(player) = self.audio_player() else {
            return;
        };
        // 音频自然播放到结尾时由时钟自己处理结束
        if player.current_time() == player.duration() {
            return;
        }
        let was_paused = {
            let mut state = self.shared.state.borrow_mut();
            let was_paused = state.clock.is_paused();
            state.clock.pause();
            was_paused
        };
        if !was_paused {
            self.shared.on_pause_animation.notify();
        }
    }

    fn handle_audio_play(&self) {
        if self.shared.state.borrow().audio_play_cancelled {
            return;
        }
        self.play_internal();
    }

    fn handle_audio_seek(&self) {
        let Some(player) = self.audio_player() else {
            return;
        };
        let frame_time = player.current_time() * FRAMES_PER_SECOND;
        let paused = self.shared.state.borrow().clock.is_paused();
        self.seek_internal(frame_time, paused);
    }

    // ========== 播放控制 ==========

    fn play_internal(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if !state.clock.start() {
                return;
            }
            if state.clock.current_frame_time() == 0.0 && state.options.auto_physics_initialization {
                let ids: Vec<ModelId> = state.models.keys().collect();
                state.needs_physics_init.extend(ids);
            }
        }
        self.shared.on_play_animation.notify();
    }

    /// 播放动画
    ///
    /// 有音频且未播放完时先请求音频播放，由音频的播放事件驱动时钟；
    /// 音频播放失败时记录错误并静音播放。
    pub async fn play_animation(&self) {
        self.supersede_audio_plays(false);
        let player = self.audio_player();
        let frame_time = self.current_frame_time();

        let Some(player) = player.filter(|p| frame_time < p.duration() * FRAMES_PER_SECOND) else {
            self.play_internal();
            return;
        };

        let current_time = frame_time / FRAMES_PER_SECOND;
        if clock::SYNC_TOLERANCE < (player.current_time() - current_time).abs() {
            player.set_current_time_without_notify(current_time);
        }

        let generations = self.begin_audio_play();
        let result = player.play().await;
        if self.finish_audio_play(&player, generations) != AudioPlayRequest::Current {
            return;
        }
        if let Err(e) = result {
            self.logger().error(&format!("Failed to play audio: {}", e));
            self.play_internal();
        }
    }

    /// 暂停动画（有音频在播放时同时暂停音频）
    ///
    /// 仍在等待的音频播放请求随之作废，播放完成后音频会被停下。
    pub fn pause_animation(&self) {
        self.supersede_audio_plays(true);
        match self.audio_player().filter(|p| !p.paused()) {
            Some(player) => {
                player.pause();
                self.shared.state.borrow_mut().clock.pause();
            }
            None => {
                self.shared.state.borrow_mut().clock.pause();
                self.shared.on_pause_animation.notify();
            }
        }
    }

    fn seek_internal(&self, frame_time: f64, force_evaluate: bool) {
        {
            let mut state = self.shared.state.borrow_mut();
            let outcome = state.clock.seek(frame_time);
            if outcome.teleported {
                state.mark_animated_models();
            }

            if force_evaluate {
                let frame_time = outcome.frame_time;
                for (_, model) in state.models.iter_mut() {
                    model.animate(frame_time);
                }
                if let Some(camera) = state.camera.as_mut() {
                    camera.animate(frame_time);
                }
            }
        }

        if force_evaluate {
            self.shared.on_animation_tick.notify();
        }
        self.shared.on_seek_animation.notify();
    }

    /// 跳转到指定帧
    ///
    /// 帧时间限制在 `[0, 时长]`。`force_evaluate` 为 true 时即使暂停也立即求值动画。
    pub async fn seek_animation(&self, frame_time: f64, force_evaluate: bool) {
        let (player, frame_time, paused, duration) = {
            let state = self.shared.state.borrow();
            (
                state.audio.as_ref().map(|a| a.player.clone()),
                state.clock.clamp_frame_time(frame_time),
                state.clock.is_paused(),
                state.clock.frame_time_duration(),
            )
        };

        let Some(player) = player else {
            self.seek_internal(frame_time, force_evaluate);
            return;
        };

        if !player.paused() {
            // 由音频的 seek 事件驱动动画跳转
            player.set_current_time(frame_time / FRAMES_PER_SECOND);
        } else if !paused
            && player.current_time() * FRAMES_PER_SECOND < duration
            && frame_time < player.duration() * FRAMES_PER_SECOND
        {
            // 动画在播放但音频已停：跳转并重新播放音频
            player.set_current_time_without_notify(frame_time / FRAMES_PER_SECOND);
            self.supersede_audio_plays(false);
            let generations = self.begin_audio_play();
            let result = player.play().await;
            if self.finish_audio_play(&player, generations) != AudioPlayRequest::Current {
                return;
            }
            if let Err(e) = result {
                self.logger().error(&format!("Failed to play audio: {}", e));
                self.seek_internal(frame_time, force_evaluate);
            }
        } else {
            self.seek_internal(frame_time, force_evaluate);
            player.set_current_time_without_notify(frame_time / FRAMES_PER_SECOND);
        }
    }

    // ========== 每帧更新 ==========

    /// 物理步进前
    ///
    /// # 参数
    /// - `delta_ms`: 距上一帧的时间（毫秒）
    pub fn before_physics(&self, delta_ms: f64) {
        let player = self.audio_player();
        if let Some(player) = player.as_ref() {
            player.pump_media_events();
        }

        let paused = self.shared.state.borrow().clock.is_paused();
        if !paused {
            let audio_time = player
                .as_ref()
                .filter(|p| !p.paused())
                .map(|p| p.current_time());

            let outcome = {
                let mut state = self.shared.state.borrow_mut();
                let outcome = state.clock.advance(delta_ms, audio_time);
                if outcome.is_some_and(|o| o.teleported) {
                    state.mark_animated_models();
                }
                outcome
            };

            if let Some(outcome) = outcome {
                if outcome.reached_end {
                    match player.as_ref().filter(|p| !p.paused()) {
                        // 音频与动画一起结束
                        Some(player) => player.pause(),
                        None => self.shared.on_pause_animation.notify(),
                    }
                }

                {
                    let mut state = self.shared.state.borrow_mut();
                    let RuntimeState {
                        models,
                        camera,
                        physics,
                        ..
                    } = &mut *state;
                    for (_, model) in models.iter_mut() {
                        model.before_physics(Some(outcome.frame_time), physics_slot(physics));
                    }
                    if let Some(camera) = camera.as_mut() {
                        camera.animate(outcome.frame_time);
                    }
                }
                self.shared.on_animation_tick.notify();
            }
        } else {
            let mut state = self.shared.state.borrow_mut();
            let RuntimeState {
                models, physics, ..
            } = &mut *state;
            for (_, model) in models.iter_mut() {
                model.before_physics(None, physics_slot(physics));
            }
        }

        let mut state = self.shared.state.borrow_mut();
        let pending: Vec<ModelId> = state.needs_physics_init.drain().collect();
        let RuntimeState {
            models, physics, ..
        } = &mut *state;
        for id in pending {
            if let Some(model) = models.get_mut(id) {
                model.initialize_physics(physics_slot(physics));
            }
        }
    }

    /// 物理步进（秒）
    pub fn step_physics(&self, delta_time: f32) {
        if let Some(physics) = self.shared.state.borrow_mut().physics.as_mut() {
            physics.step(delta_time);
        }
    }

    /// 物理步进后
    pub fn after_physics(&self) {
        let mut state = self.shared.state.borrow_mut();
        let RuntimeState {
            models, physics, ..
        } = &mut *state;
        let physics: Option<&dyn PhysicsCapability> = match physics {
            Some(physics) => Some(&**physics),
            None => None,
        };
        for (_, model) in models.iter_mut() {
            model.after_physics(physics);
        }
    }

    /// 完整的一帧：步进前 → 物理 → 步进后
    pub fn update(&self, delta_ms: f64) {
        self.before_physics(delta_ms);
        self.step_physics((delta_ms / 1000.0) as f32);
        self.after_physics();
    }

    // ========== 状态 ==========

    pub fn is_animation_playing(&self) -> bool {
        !self.shared.state.borrow().clock.is_paused()
    }

    pub fn current_frame_time(&self) -> f64 {
        self.shared.state.borrow().clock.current_frame_time()
    }

    /// 当前时间（秒）
    pub fn current_time(&self) -> f64 {
        self.shared.state.borrow().clock.current_time()
    }

    pub fn animation_frame_time_duration(&self) -> f64 {
        self.shared.state.borrow().clock.frame_time_duration()
    }

    /// 动画时长（秒）
    pub fn animation_duration(&self) -> f64 {
        self.shared.state.borrow().clock.duration()
    }

    pub fn time_scale(&self) -> f64 {
        self.shared.state.borrow().clock.time_scale()
    }

    /// 设置时间缩放（同步到音频播放速率，不触发音频的速率通知）
    pub fn set_time_scale(&self, time_scale: f64) {
        self.shared
            .state
            .borrow_mut()
            .clock
            .set_time_scale(time_scale);
        if let Some(player) = self.audio_player() {
            player.set_playback_rate_without_notify(time_scale);
        }
    }

    /// 设置手动时长（帧，None 恢复自动统计）
    pub fn set_manual_animation_duration(&self, frame_time_duration: Option<f64>) {
        let notify = self
            .shared
            .state
            .borrow_mut()
            .clock
            .set_manual_duration(frame_time_duration);
        if notify {
            self.shared.on_animation_duration_changed.notify();
        }
    }

    /// 模型是否等待物理初始化
    pub fn needs_physics_initialization(&self, id: ModelId) -> bool {
        self.shared.state.borrow().needs_physics_init.contains(&id)
    }

    /// 释放所有模型、相机和音频，清空事件通道
    pub fn dispose(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            let RuntimeState {
                models, physics, ..
            } = &mut *state;
            for (_, model) in models.iter_mut() {
                model.dispose(physics_slot(physics));
            }
            models.clear();
            state.camera = None;
            state.needs_physics_init.clear();
            state.audio_generation += 1;
        }
        self.detach_audio();

        let shared = &self.shared;
        shared.on_animation_duration_changed.clear();
        shared.on_play_animation.clear();
        shared.on_pause_animation.clear();
        shared.on_seek_animation.clear();
        shared.on_animation_tick.clear();
    }
}

impl std::fmt::Debug for MmdRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("MmdRuntime")
            .field("models", &state.models.len())
            .field("frame_time", &state.clock.current_frame_time())
            .field("duration", &state.clock.frame_time_duration())
            .field("paused", &state.clock.is_paused())
            .finish()
    }
}
