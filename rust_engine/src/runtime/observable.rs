//! 单线程广播通道
//!
//! 通知时先复制监听者列表再逐个调用，所以监听者可以在回调中增删监听者
//! 或触发其他通道的通知。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// 监听者标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Observer {
    id: ObserverId,
    callback: Rc<dyn Fn()>,
    once: bool,
}

/// 广播通道
#[derive(Default)]
pub struct Observable {
    observers: RefCell<Vec<Observer>>,
    next_id: Cell<u64>,
}

impl Observable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, callback: Rc<dyn Fn()>, once: bool) -> ObserverId {
        let id = ObserverId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.observers.borrow_mut().push(Observer { id, callback, once });
        id
    }

    /// 添加监听者
    pub fn add(&self, callback: impl Fn() + 'static) -> ObserverId {
        self.insert(Rc::new(callback), false)
    }

    /// 添加只触发一次的监听者
    pub fn add_once(&self, callback: impl Fn() + 'static) -> ObserverId {
        self.insert(Rc::new(callback), true)
    }

    /// 移除监听者，返回是否存在
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.borrow_mut();
        let len = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != len
    }

    /// 通知所有监听者
    pub fn notify(&self) {
        let snapshot: Vec<Rc<dyn Fn()>> = {
            let mut observers = self.observers.borrow_mut();
            let snapshot = observers.iter().map(|o| o.callback.clone()).collect();
            observers.retain(|o| !o.once);
            snapshot
        };
        for callback in snapshot {
            callback();
        }
    }

    pub fn clear(&self) {
        self.observers.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.observers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.borrow().is_empty()
    }
}

impl std::fmt::Debug for Observable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("observers", &self.len())
            .finish()
    }
}
