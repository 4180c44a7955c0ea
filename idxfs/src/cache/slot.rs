//! 缓存槽
//!
//! 槽位的元信息（绑定的扇区、预定、脏、I/O 中、读写计数）由槽锁保护；
//! 数据本身放在单独的读写锁里，拷贝时不必持有槽锁。

use core::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use spin::RwLock;

use super::evict::SlotView;
use crate::{SectorId, SECTOR_SIZE};

/// 一个扇区的数据，按 8 字节对齐以便按类型访问
#[repr(C, align(8))]
pub struct SectorBuf(pub [u8; SECTOR_SIZE]);

#[derive(Debug, Default)]
pub struct SlotState {
    /// 当前驻留的扇区
    pub sector: Option<SectorId>,
    /// 缺失处理期间，本槽被预定给的扇区
    pub reserved: Option<SectorId>,
    pub dirty: bool,
    /// 正在装入、换出或回写；此时不可被选作牺牲者，也不可被拷贝
    pub in_io: bool,
    pub readers: u32,
    pub writers: u32,
    pub last_used: u64,
}

pub struct Slot {
    state: Mutex<SlotState>,
    /// 槽位状态变化：I/O 结束或读写计数归零
    cond: Condvar,
    pub data: RwLock<Box<SectorBuf>>,
}

impl SectorBuf {
    pub fn get<T>(&self, offset: usize) -> &T {
        Self::check::<T>(offset);
        unsafe { &*self.0.as_ptr().add(offset).cast() }
    }

    pub fn get_mut<T>(&mut self, offset: usize) -> &mut T {
        Self::check::<T>(offset);
        unsafe { &mut *self.0.as_mut_ptr().add(offset).cast() }
    }

    #[inline]
    fn check<T>(offset: usize) {
        assert!(offset + mem::size_of::<T>() <= SECTOR_SIZE);
        assert_eq!(0, offset % mem::align_of::<T>());
    }
}

impl SlotState {
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.readers == 0 && self.writers == 0
    }

    pub fn view(&self) -> SlotView {
        SlotView {
            sector: self.sector,
            busy: self.in_io || self.reserved.is_some(),
            idle: self.is_idle(),
            dirty: self.dirty,
            last_used: self.last_used,
        }
    }
}

impl Slot {
    pub fn new() -> Self {
        Self {
            state: Mutex::default(),
            cond: Condvar::new(),
            data: RwLock::new(Box::new(SectorBuf([0; SECTOR_SIZE]))),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn wait<'a>(&self, guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// 等到槽位不在 I/O 中
    pub fn wait_io<'a>(&self, mut guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        while guard.in_io {
            guard = self.wait(guard);
        }
        guard
    }

    /// 等到旧内容上的拷贝全部结束
    pub fn wait_idle<'a>(&self, mut guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        while !guard.is_idle() {
            guard = self.wait(guard);
        }
        guard
    }

    #[inline]
    pub fn broadcast(&self) {
        self.cond.notify_all();
    }
}
