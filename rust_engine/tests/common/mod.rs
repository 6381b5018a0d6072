//! 集成测试共用的记录后端、脚本化媒体源和手动时钟
#![allow(dead_code)]

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use glam::Vec3;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mmd_runtime::audio::{MediaClockSource, MediaEvent, TimeSource};
use mmd_runtime::physics::capability::{
    AfterStepAction, AfterStepQueue, BodyDesc, BodyHandle, ConstraintDesc, ConstraintHandle,
    MotionType, PhysicsCapability, RigidTransform, ShapeDesc, ShapeHandle,
};
use mmd_runtime::{AudioPlayer, Bone, BoneManager, Logger, PlaybackError};

// ========== 物理 ==========

#[derive(Debug, Clone)]
pub struct RecordedBody {
    pub shape: ShapeHandle,
    pub desc: BodyDesc,
    pub transform: RigidTransform,
    pub kinematic_target: Option<RigidTransform>,
    pub motion_type: MotionType,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

/// 只记录调用的物理后端
pub struct RecordingPhysics {
    pub name: String,
    pub enabled: bool,
    pub shapes: Vec<ShapeDesc>,
    pub bodies: Vec<RecordedBody>,
    pub constraints: Vec<(BodyHandle, BodyHandle, ConstraintDesc)>,
    pub after_step: AfterStepQueue,
    /// 按顺序记录的释放调用，如 "constraint:0"、"shape:1"、"body:1"
    pub removals: Vec<String>,
    pub steps: usize,
}

impl RecordingPhysics {
    pub fn new() -> Self {
        Self {
            name: "recording".to_string(),
            enabled: true,
            shapes: Vec::new(),
            bodies: Vec::new(),
            constraints: Vec::new(),
            after_step: AfterStepQueue::new(),
            removals: Vec::new(),
            steps: 0,
        }
    }

    pub fn body(&self, body: BodyHandle) -> &RecordedBody {
        &self.bodies[body.0 as usize]
    }
}

impl PhysicsCapability for RecordingPhysics {
    fn engine_name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn create_shape(&mut self, desc: &ShapeDesc) -> ShapeHandle {
        self.shapes.push(*desc);
        ShapeHandle(self.shapes.len() as u32 - 1)
    }

    fn create_body(&mut self, shape: ShapeHandle, desc: &BodyDesc) -> BodyHandle {
        self.bodies.push(RecordedBody {
            shape,
            desc: *desc,
            transform: desc.transform,
            kinematic_target: None,
            motion_type: desc.motion_type,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        });
        BodyHandle(self.bodies.len() as u32 - 1)
    }

    fn create_constraint(
        &mut self,
        body_a: BodyHandle,
        body_b: BodyHandle,
        desc: &ConstraintDesc,
    ) -> ConstraintHandle {
        self.constraints.push((body_a, body_b, *desc));
        ConstraintHandle(self.constraints.len() as u32 - 1)
    }

    fn body_transform(&self, body: BodyHandle) -> RigidTransform {
        self.bodies[body.0 as usize].transform
    }

    fn set_body_transform(&mut self, body: BodyHandle, transform: RigidTransform) {
        self.bodies[body.0 as usize].transform = transform;
    }

    fn set_kinematic_target(&mut self, body: BodyHandle, transform: RigidTransform) {
        self.bodies[body.0 as usize].kinematic_target = Some(transform);
    }

    fn set_velocities(&mut self, body: BodyHandle, linear: Vec3, angular: Vec3) {
        let body = &mut self.bodies[body.0 as usize];
        body.linear_velocity = linear;
        body.angular_velocity = angular;
    }

    fn motion_type(&self, body: BodyHandle) -> MotionType {
        self.bodies[body.0 as usize].motion_type
    }

    fn set_motion_type(&mut self, body: BodyHandle, motion_type: MotionType) {
        self.bodies[body.0 as usize].motion_type = motion_type;
    }

    fn schedule_after_step(&mut self, action: AfterStepAction) -> bool {
        self.after_step.push(action)
    }

    /// 运动学刚体移动到目标位置，然后执行步进后队列
    fn step(&mut self, _delta_time: f32) {
        self.steps += 1;
        for body in &mut self.bodies {
            if body.motion_type == MotionType::Kinematic {
                if let Some(target) = body.kinematic_target {
                    body.transform = target;
                }
            }
        }
        for action in self.after_step.drain() {
            match action {
                AfterStepAction::RestoreMotionType { body, motion_type } => {
                    self.set_motion_type(body, motion_type)
                }
            }
        }
    }

    fn remove_constraint(&mut self, constraint: ConstraintHandle) {
        self.removals.push(format!("constraint:{}", constraint.0));
    }

    fn remove_shape(&mut self, shape: ShapeHandle) {
        self.removals.push(format!("shape:{}", shape.0));
    }

    fn remove_body(&mut self, body: BodyHandle) {
        self.after_step.forget(body);
        self.removals.push(format!("body:{}", body.0));
    }
}

// ========== 骨骼 ==========

/// センター → 上半身 → 頭 → 髪 → 髪先
pub fn sample_skeleton() -> BoneManager {
    let mut bones = BoneManager::new();
    bones.add_bone(Bone::with_parent("センター", -1, Vec3::new(0.0, 8.0, 0.0)));
    bones.add_bone(Bone::with_parent("上半身", 0, Vec3::new(0.0, 12.0, 0.0)));
    bones.add_bone(Bone::with_parent("頭", 1, Vec3::new(0.0, 15.0, 0.0)));
    bones.add_bone(Bone::with_parent("髪", 2, Vec3::new(0.0, 16.0, 1.0)));
    bones.add_bone(Bone::with_parent("髪先", 3, Vec3::new(0.0, 14.0, 1.0)));
    bones.build_hierarchy();
    bones
}

// ========== 音频 ==========

/// 媒体源对 play() 的响应方式
#[derive(Debug, Clone, PartialEq)]
pub enum PlayMode {
    /// 立即开始播放
    Resolve,
    /// 立即失败
    Reject(PlaybackError),
    /// 挂起，直到调用 [`MediaHandle::resolve_pending_plays`]
    Deferred,
}

pub struct MediaState {
    pub paused: bool,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub source: String,
    pub events: Vec<MediaEvent>,
    pub play_mode: PlayMode,
    pub pending_plays: Vec<oneshot::Sender<Result<(), PlaybackError>>>,
    pub play_calls: usize,
    pub load_calls: usize,
}

/// 测试侧操纵脚本化媒体源的句柄
#[derive(Clone)]
pub struct MediaHandle {
    pub state: Rc<RefCell<MediaState>>,
}

impl MediaHandle {
    pub fn set_play_mode(&self, mode: PlayMode) {
        self.state.borrow_mut().play_mode = mode;
    }

    /// 模拟元数据加载完成（需要随后分发事件）
    pub fn load_metadata(&self, duration: f64) {
        let mut state = self.state.borrow_mut();
        state.duration = duration;
        state.events.push(MediaEvent::DurationChanged);
    }

    /// 模拟源被重新加载：停止并回到开头，随后报告新的时长
    pub fn reload(&self, duration: f64) {
        let mut state = self.state.borrow_mut();
        state.paused = true;
        state.current_time = 0.0;
        state.duration = duration;
        state.events.push(MediaEvent::DurationChanged);
    }

    pub fn fail_load(&self) {
        self.state.borrow_mut().events.push(MediaEvent::Error);
    }

    /// 让所有挂起的 play 成功
    pub fn resolve_pending_plays(&self) {
        let senders: Vec<_> = {
            let mut state = self.state.borrow_mut();
            let senders: Vec<_> = state.pending_plays.drain(..).collect();
            if !senders.is_empty() {
                state.paused = false;
                state.events.push(MediaEvent::Playing);
            }
            senders
        };
        for sender in senders {
            let _ = sender.send(Ok(()));
        }
    }

    pub fn set_current_time(&self, value: f64) {
        self.state.borrow_mut().current_time = value;
    }

    pub fn paused(&self) -> bool {
        self.state.borrow().paused
    }

    pub fn current_time(&self) -> f64 {
        self.state.borrow().current_time
    }

    pub fn playback_rate(&self) -> f64 {
        self.state.borrow().playback_rate
    }

    pub fn play_calls(&self) -> usize {
        self.state.borrow().play_calls
    }

    pub fn load_calls(&self) -> usize {
        self.state.borrow().load_calls
    }

    pub fn source(&self) -> String {
        self.state.borrow().source.clone()
    }
}

/// 按脚本响应的媒体源
pub struct ScriptedMediaSource {
    state: Rc<RefCell<MediaState>>,
}

impl ScriptedMediaSource {
    pub fn new(source: &str) -> (Self, MediaHandle) {
        let state = Rc::new(RefCell::new(MediaState {
            paused: true,
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            volume: 1.0,
            source: source.to_string(),
            events: Vec::new(),
            play_mode: PlayMode::Resolve,
            pending_plays: Vec::new(),
            play_calls: 0,
            load_calls: 0,
        }));
        (
            Self {
                state: state.clone(),
            },
            MediaHandle { state },
        )
    }
}

impl MediaClockSource for ScriptedMediaSource {
    fn play(&mut self) -> LocalBoxFuture<'static, Result<(), PlaybackError>> {
        let mut state = self.state.borrow_mut();
        state.play_calls += 1;
        match state.play_mode.clone() {
            PlayMode::Resolve => {
                state.paused = false;
                state.events.push(MediaEvent::Playing);
                future::ready(Ok(())).boxed_local()
            }
            PlayMode::Reject(error) => future::ready(Err(error)).boxed_local(),
            PlayMode::Deferred => {
                let (sender, receiver) = oneshot::channel();
                state.pending_plays.push(sender);
                async move { receiver.await.unwrap_or(Err(PlaybackError::Aborted)) }.boxed_local()
            }
        }
    }

    fn pause(&mut self) {
        let mut state = self.state.borrow_mut();
        if !state.paused {
            state.paused = true;
            state.events.push(MediaEvent::Pause);
        }
    }

    fn paused(&self) -> bool {
        self.state.borrow().paused
    }

    fn current_time(&self) -> f64 {
        self.state.borrow().current_time
    }

    fn set_current_time(&mut self, value: f64) {
        let mut state = self.state.borrow_mut();
        state.current_time = value;
        state.events.push(MediaEvent::Seeked);
    }

    fn duration(&self) -> f64 {
        self.state.borrow().duration
    }

    fn playback_rate(&self) -> f64 {
        self.state.borrow().playback_rate
    }

    fn set_playback_rate(&mut self, value: f64) {
        self.state.borrow_mut().playback_rate = value;
    }

    fn volume(&self) -> f64 {
        self.state.borrow().volume
    }

    fn set_volume(&mut self, value: f64) {
        self.state.borrow_mut().volume = value;
    }

    fn source(&self) -> String {
        self.state.borrow().source.clone()
    }

    fn set_source(&mut self, source: &str) {
        self.state.borrow_mut().source = source.to_string();
    }

    fn load(&mut self) {
        self.state.borrow_mut().load_calls += 1;
    }

    fn take_events(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.state.borrow_mut().events)
    }
}

/// 手动推进的时钟（秒）
#[derive(Default)]
pub struct ManualTime {
    now: Cell<f64>,
}

impl ManualTime {
    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

/// 创建使用脚本化源和手动时钟的播放器
pub fn scripted_player() -> (AudioPlayer, MediaHandle, Rc<ManualTime>) {
    let (source, handle) = ScriptedMediaSource::new("music.mp3");
    let time = Rc::new(ManualTime::default());
    let player = AudioPlayer::new(Box::new(source), time.clone());
    (player, handle, time)
}

/// 已加载元数据的播放器
pub fn loaded_player(duration: f64) -> (AudioPlayer, MediaHandle, Rc<ManualTime>) {
    let (player, handle, time) = scripted_player();
    handle.load_metadata(duration);
    player.pump_media_events();
    (player, handle, time)
}

// ========== 其他 ==========

/// 统计通知次数
pub fn counter() -> (Rc<Cell<usize>>, impl Fn() + 'static) {
    let count = Rc::new(Cell::new(0));
    let inner = count.clone();
    (count, move || inner.set(inner.get() + 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Log,
    Warn,
    Error,
}

/// 记录所有消息的日志
#[derive(Default)]
pub struct RecordingLogger {
    pub messages: RefCell<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, message: &str) {
        self.messages.borrow_mut().push((Level::Log, message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.messages.borrow_mut().push((Level::Warn, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages.borrow_mut().push((Level::Error, message.to_string()));
    }
}
