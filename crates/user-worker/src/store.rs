//! 用户存储
//!
//! 处理器只依赖 [`UserStore`] trait；默认实现为进程内存储，
//! 进程退出即丢失，持久化后端可通过实现该 trait 替换。

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::model::User;

/// 用户存储抽象
///
/// 两个操作都是原子的：并发调用互相不可见中间状态。
#[cfg_attr(test, mockall::automock)]
pub trait UserStore: Send + Sync {
    /// 新增用户并返回分配的 ID
    ///
    /// 忽略入参中的 `id`；用户名已存在时返回 Conflict 且不消耗 ID。
    fn add(&self, user: User) -> Result<u64, StoreError>;

    /// 按 `user.id` 整体替换已有记录，ID 不存在时返回 NotFound
    fn save(&self, user: User) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    /// 最近一次分配的 ID，从 1 开始递增且不复用
    last_id: u64,
    users: HashMap<u64, User>,
}

/// 进程内用户存储
#[derive(Default)]
pub struct InMemoryUserStore {
    inner: Mutex<Inner>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<User> {
        self.inner.lock().users.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserStore for InMemoryUserStore {
    fn add(&self, mut user: User) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();

        if inner.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict {
                username: user.username,
            });
        }

        inner.last_id += 1;
        let id = inner.last_id;
        user.id = id;
        inner.users.insert(id, user);

        Ok(id)
    }

    fn save(&self, user: User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        match inner.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user;
                Ok(())
            }
            None => Err(StoreError::NotFound { id: user.id }),
        }
    }
}
