// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 渲染结果缓存
//!
//! 固定容量、按条目过期的键值缓存，用于保护开销较大的页面渲染。
//!
//! - 条目按插入顺序存放在环形缓冲区（`VecDeque`）中，删除某个位置时其后的条目整体前移。
//! - 过期条目是惰性清理的：`get` 命中过期条目时顺手删除，`size` 与满载时的 `set` 会做一次整体清扫。
//! - 缓存满且全部为存活条目时，`set` 直接返回 `false`，绝不驱逐存活条目，也不阻塞调用方。
//! - 所有操作都在内部互斥锁下完成，锁不会跨越任何 `.await`。
//!
//! 每个操作都是 O(capacity) 的线性扫描，容量在几十条以内时足够；
//! 更大规模需要换成哈希索引加插入顺序链表，对外契约保持不变。

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use log::warn;

/// 单条目 TTL 的上限，避免 `Instant` 加法溢出。
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// 缓存使用的时间源。
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// 单调时钟，生产环境使用。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的时钟，用于在测试与基准中模拟时间流逝。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

struct CacheEntry {
    key: String,
    value: String,
    expiry: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expiry
    }
}

pub struct TtlCache<C: Clock = SystemClock> {
    capacity: usize,
    entries: Mutex<VecDeque<CacheEntry>>,
    clock: C,
}

impl TtlCache<SystemClock> {
    // 根据容量构造。容量为 0 时缓存被禁用，所有 set 都返回 false
    pub fn from_capacity(capacity: usize) -> Self {
        Self::with_clock(capacity, SystemClock)
    }
}

impl<C: Clock> TtlCache<C> {
    pub fn with_clock(capacity: usize, clock: C) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            clock,
        }
    }

    /// 写入一个条目，`ttl_secs` 秒后过期。
    ///
    /// 同名的存活条目会被原地刷新（值与过期时间），不占用新的槽位，也不改变其插入位置；
    /// 同名的过期条目会先被删除。缓存满时先清扫过期条目，仍然没有空位则返回 `false`。
    pub fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let now = self.clock.now();
        let expiry = now + Duration::from_secs(ttl_secs).min(MAX_TTL);
        let mut entries = self.lock();

        if let Some(pos) = entries.iter().position(|e| e.key == key) {
            if entries[pos].is_live(now) {
                let entry = &mut entries[pos];
                entry.value = value.to_string();
                entry.expiry = expiry;
                return true;
            }
            entries.remove(pos);
        }

        if entries.len() >= self.capacity {
            Self::sweep(&mut entries, now);
            if entries.len() >= self.capacity {
                return false;
            }
        }

        entries.push_back(CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            expiry,
        });
        true
    }

    /// 查询存活条目。命中的条目若已过期则被删除并返回 `None`；访问不会改变条目顺序。
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let pos = entries.iter().position(|e| e.key == key)?;
        if entries[pos].is_live(now) {
            Some(entries[pos].value.clone())
        } else {
            entries.remove(pos);
            None
        }
    }

    /// 删除条目（无论是否过期），找到并删除时返回 `true`。
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|e| e.key == key) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// 清扫过期条目后返回存活条目数。
    pub fn size(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::sweep(&mut entries, now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // retain 保持剩余条目的插入顺序
    fn sweep(entries: &mut VecDeque<CacheEntry>, now: Instant) {
        entries.retain(|e| e.is_live(now));
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.key.clone()).collect()
    }
}
