//! 日志接口
//!
//! 构建物理模型和运行时同步时遇到的非致命问题都通过注入的 `Logger` 上报，
//! 而不是直接返回错误。默认实现转发给 `log` crate。

/// 可注入的日志接口
pub trait Logger {
    fn log(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// 转发到 `log` crate 的日志实现
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl Logger for LogCrateLogger {
    fn log(&self, message: &str) {
        log::info!(target: "mmd_runtime", "{}", message);
    }

    fn warn(&self, message: &str) {
        log::warn!(target: "mmd_runtime", "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: "mmd_runtime", "{}", message);
    }
}

/// 丢弃所有消息（运行时关闭日志时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
