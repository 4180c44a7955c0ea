//! # 后台任务
//!
//! - 回写：每隔固定周期把所有脏槽写回设备，停机时再同步写一次；
//! - 预读：从 FIFO 中取出扇区号并装入缓存，停机时丢弃剩余请求。

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::BufferCache;
use crate::config::READ_AHEAD_CAPACITY;
use crate::SectorId;

/// 两个后台线程与缓存共享的状态
#[derive(Debug, Default)]
pub(super) struct Chores {
    state: Mutex<ChoreState>,
    /// 预读队列非空或停机
    ready: Condvar,
    /// 停机
    halt: Condvar,
}

#[derive(Debug, Default)]
struct ChoreState {
    read_ahead: VecDeque<SectorId>,
    /// 有 [`CacheDaemon`] 在跑
    running: bool,
    halted: bool,
}

/// 预读请求被拒的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Rejected {
    /// 没有后台线程来处理
    Idle,
    Full,
}

/// 缓存的后台线程；[`CacheDaemon::shutdown`] 或析构时停机
pub struct CacheDaemon {
    cache: Arc<BufferCache>,
    handles: Vec<JoinHandle<()>>,
}

impl Chores {
    fn lock(&self) -> MutexGuard<'_, ChoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 排入一个预读请求；没有后台线程或队列满时丢弃
    pub fn push(&self, sector: SectorId) -> Result<(), Rejected> {
        let mut state = self.lock();
        if !state.running || state.halted {
            return Err(Rejected::Idle);
        }
        if state.read_ahead.len() >= READ_AHEAD_CAPACITY {
            return Err(Rejected::Full);
        }
        state.read_ahead.push_back(sector);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.lock().read_ahead.len()
    }
}

impl CacheDaemon {
    pub fn spawn(cache: &Arc<BufferCache>) -> Self {
        {
            let mut state = cache.chores.lock();
            state.running = true;
            state.halted = false;
        }

        let write_behind = {
            let cache = cache.clone();
            thread::Builder::new()
                .name("idxfs-write-behind".into())
                .spawn(move || write_behind(&cache))
                .expect("failed to spawn the write-behind thread")
        };
        let read_ahead = {
            let cache = cache.clone();
            thread::Builder::new()
                .name("idxfs-read-ahead".into())
                .spawn(move || read_ahead(&cache))
                .expect("failed to spawn the read-ahead thread")
        };
        log::info!("cache daemon started");

        Self {
            cache: cache.clone(),
            handles: vec![write_behind, read_ahead],
        }
    }

    /// 停机：回写线程最后同步回写一次，预读线程丢弃剩余请求
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        let chores = &self.cache.chores;
        chores.lock().halted = true;
        chores.ready.notify_all();
        chores.halt.notify_all();

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("a cache worker panicked");
            }
        }
        chores.lock().running = false;
        log::info!("cache daemon stopped");
    }
}

impl Drop for CacheDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_behind(cache: &BufferCache) {
    let chores = &cache.chores;
    let interval = cache.config.write_behind_interval;

    loop {
        let (state, _) = chores
            .halt
            .wait_timeout_while(chores.lock(), interval, |state| !state.halted)
            .unwrap_or_else(PoisonError::into_inner);
        let halted = state.halted;
        drop(state);

        let flushed = cache.flush_all();
        log::debug!("write-behind flushed {flushed} slot(s)");
        if halted {
            break;
        }
    }
}

fn read_ahead(cache: &BufferCache) {
    let chores = &cache.chores;

    loop {
        let mut state = chores
            .ready
            .wait_while(chores.lock(), |state| {
                state.read_ahead.is_empty() && !state.halted
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.halted {
            let dropped = state.read_ahead.len();
            state.read_ahead.clear();
            log::debug!("read-ahead discarded {dropped} pending request(s)");
            break;
        }

        let Some(sector) = state.read_ahead.pop_front() else {
            continue;
        };
        drop(state);

        cache.get(sector);
        log::trace!("read-ahead warmed {sector}");
    }
}
