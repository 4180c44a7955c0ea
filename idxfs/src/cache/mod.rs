//! # 块缓存层
//!
//! 块设备读写速度远慢于内存，因此在内存中开辟固定数量的缓存槽，
//! 把即将操作的扇区复制到槽里；设备的读写**只**经由本层。
//!
//! 两级锁：
//! - 全局锁只在查找或预定槽位时短暂持有，持有期间可以顺带锁一下槽锁做快照；
//! - 槽锁保护单个槽位的 I/O 与读写计数。持有槽锁时绝不再去拿全局锁。
//!
//! 缺失处理（见 [`BufferCache::get`]）先在全局锁下预定牺牲槽并标记 `in_io`，
//! 随后放开全局锁，在槽位上等旧内容的拷贝结束、换出、装入。
//! 这样不同扇区的缺失可以并发处理，同一扇区也永远不会驻留在两个槽里。

mod daemon;
mod evict;
mod slot;

use std::sync::atomic::{self, AtomicU64};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use block_dev::BlockDevice;

use self::daemon::{Chores, Rejected};
use self::slot::{SectorBuf, Slot, SlotState};
use crate::{CacheConfig, SectorId, SECTOR_SIZE};

pub use self::daemon::CacheDaemon;

pub struct BufferCache {
    dev: Arc<dyn BlockDevice>,
    slots: Box<[Slot]>,
    /// 全局锁，顺带记录统计信息
    table: Mutex<CacheStats>,
    /// 有槽位结束了 I/O
    slot_freed: Condvar,
    /// 单调递增的时间戳
    clock: AtomicU64,
    chores: Chores,
    config: CacheConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 换出了一个驻留扇区的缺失
    pub evictions: u64,
    /// 写回设备的次数（换出时回写与主动回写）
    pub write_backs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// 拷贝期间钉住槽位，析构时解除
struct Pin<'a> {
    cache: &'a BufferCache,
    index: usize,
    access: Access,
}

impl BufferCache {
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        Self::with_config(dev, CacheConfig::default())
    }

    pub fn with_config(dev: Arc<dyn BlockDevice>, config: CacheConfig) -> Self {
        assert!(config.slots > 0, "a cache needs at least one slot");

        Self {
            dev,
            slots: (0..config.slots).map(|_| Slot::new()).collect(),
            table: Mutex::default(),
            slot_freed: Condvar::new(),
            clock: AtomicU64::new(0),
            chores: Chores::default(),
            config,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        *self.lock_table()
    }

    /// 当前驻留的扇区
    pub fn resident(&self) -> Vec<SectorId> {
        let _table = self.lock_table();
        self.slots
            .iter()
            .filter_map(|slot| slot.lock().sector)
            .collect()
    }

    /// 将扇区解析到一个槽位，必要时换出牺牲者并从设备装入；返回槽位下标。
    ///
    /// 所有槽位都在 I/O 中时阻塞等待，直到有槽位空出来。
    pub fn get(&self, sector: SectorId) -> usize {
        self.resolve(sector, None).0
    }

    /// 读取扇区内 `[offset, offset + buf.len())` 的字节
    pub fn read(&self, sector: SectorId, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        self.with_data(sector, |data| {
            buf.copy_from_slice(&data.0[offset..offset + buf.len()])
        });
    }

    /// 写入扇区内 `[offset, offset + buf.len())` 的字节，槽位随之变脏
    pub fn write(&self, sector: SectorId, offset: usize, buf: &[u8]) {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        self.with_data_mut(sector, |data| {
            data.0[offset..offset + buf.len()].copy_from_slice(buf)
        });
    }

    /// 以整个扇区为单位修改，槽位随之变脏
    pub fn modify<V>(&self, sector: SectorId, f: impl FnOnce(&mut [u8; SECTOR_SIZE]) -> V) -> V {
        self.with_data_mut(sector, |data| f(&mut data.0))
    }

    /// 读取扇区内偏移处的 `T`，`T` 须为纯数据布局
    pub(crate) fn map<T, V>(&self, sector: SectorId, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        self.with_data(sector, |data| f(data.get(offset)))
    }

    /// 修改扇区内偏移处的 `T`，`T` 须为纯数据布局
    pub(crate) fn map_mut<T, V>(
        &self,
        sector: SectorId,
        offset: usize,
        f: impl FnOnce(&mut T) -> V,
    ) -> V {
        self.with_data_mut(sector, |data| f(data.get_mut(offset)))
    }

    /// 提交一个预读请求，由后台线程装入；不影响当前读写的正确性。
    ///
    /// 没有 [`CacheDaemon`] 在跑时什么也不做。
    pub fn read_ahead(&self, sector: SectorId) {
        match self.chores.push(sector) {
            Ok(()) => {}
            Err(Rejected::Idle) => log::trace!("no cache daemon, read-ahead of {sector} skipped"),
            Err(Rejected::Full) => log::warn!("read-ahead queue is full, {sector} dropped"),
        }
    }

    /// 尚未处理的预读请求数
    pub fn pending_read_ahead(&self) -> usize {
        self.chores.pending()
    }

    /// 把槽位写回设备，不等待正在进行的拷贝；返回是否真的写了
    pub fn flush(&self, index: usize) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        let mut state = slot.lock();
        // 正在 I/O 的槽位由发起者负责
        if state.in_io || !state.dirty {
            return false;
        }
        let Some(sector) = state.sector else {
            return false;
        };
        state.in_io = true;
        state.dirty = false;
        drop(state);

        {
            let data = slot.data.read();
            self.dev.write_block(sector.block(), &data.0);
        }

        slot.lock().in_io = false;
        slot.broadcast();
        self.io_done(true);
        log::trace!("flushed {sector} from slot {index}");
        true
    }

    /// 回写指定扇区，扇区不在缓存中时什么也不做
    pub fn flush_sector(&self, sector: SectorId) -> bool {
        let index = {
            let _table = self.lock_table();
            self.find(sector)
        };
        index.is_some_and(|index| self.flush(index))
    }

    /// 回写所有脏槽，返回写回的个数
    pub fn flush_all(&self) -> usize {
        (0..self.slots.len()).filter(|&index| self.flush(index)).count()
    }
}

impl BufferCache {
    #[inline]
    fn lock_table(&self) -> MutexGuard<'_, CacheStats> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, atomic::Ordering::Relaxed)
    }

    /// 须持有全局锁。
    /// 驻留或正被装入该扇区的槽位；换出中的旧扇区同样算，调用者会等换出结束后重试。
    fn find(&self, sector: SectorId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            let state = slot.lock();
            state.sector == Some(sector) || state.reserved == Some(sector)
        })
    }

    /// 查找或装入扇区；带上 `access` 时，能钉住就在同一临界区里钉住。
    ///
    /// 返回槽位下标与是否已钉住。命中一个仍在 I/O 中的槽位时不钉住，由调用者等待后重试。
    fn resolve(&self, sector: SectorId, access: Option<Access>) -> (usize, bool) {
        let mut table = self.lock_table();

        loop {
            if let Some(index) = self.find(sector) {
                table.hits += 1;
                log::trace!("cache hit {sector} in slot {index}");
                let pinned = access.is_some_and(|access| self.try_pin(index, sector, access));
                return (index, pinned);
            }

            let views: Vec<_> = self.slots.iter().map(|slot| slot.lock().view()).collect();
            let Some(index) = evict::choose_victim(&views) else {
                log::debug!("every slot is busy, {sector} waits for one to free up");
                table = self
                    .slot_freed
                    .wait(table)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };

            let slot = &self.slots[index];
            let mut state = slot.lock();
            // 快照之后可能刚开始回写
            if state.in_io {
                continue;
            }
            state.reserved = Some(sector);
            state.in_io = true;

            table.misses += 1;
            if let Some(old) = state.sector {
                table.evictions += 1;
                log::debug!("evict {old} from slot {index} for {sector}");
            }
            drop(table);

            self.load(index, state, sector, access);
            return (index, access.is_some());
        }
    }

    /// 缺失处理的后半段：槽位已被预定且处于 `in_io`。
    /// 装入者的钉住与 `in_io` 的清除在同一临界区内完成，别的缺失无法抢在它之前换出该槽。
    fn load(
        &self,
        index: usize,
        state: MutexGuard<'_, SlotState>,
        sector: SectorId,
        access: Option<Access>,
    ) {
        let slot = &self.slots[index];
        let state = slot.wait_idle(state);
        let victim = state.sector.filter(|_| state.dirty);
        drop(state);

        {
            let mut data = slot.data.write();
            if let Some(old) = victim {
                self.dev.write_block(old.block(), &data.0);
            }
            self.dev.read_block(sector.block(), &mut data.0);
        }

        let mut state = slot.lock();
        state.sector = Some(sector);
        state.reserved = None;
        state.dirty = false;
        state.last_used = self.tick();
        if let Some(access) = access {
            self.enter(&mut state, access);
        }
        state.in_io = false;
        drop(state);

        slot.broadcast();
        self.io_done(victim.is_some());
    }

    /// 槽位结束 I/O 后唤醒等待空槽的线程；先拿一下全局锁，避免唤醒丢失
    fn io_done(&self, wrote_back: bool) {
        let mut table = self.lock_table();
        if wrote_back {
            table.write_backs += 1;
        }
        drop(table);
        self.slot_freed.notify_all();
    }

    /// 槽位空闲且确实驻留着该扇区时钉住它
    fn try_pin(&self, index: usize, sector: SectorId, access: Access) -> bool {
        let mut state = self.slots[index].lock();
        if state.in_io || state.sector != Some(sector) {
            return false;
        }
        self.enter(&mut state, access);
        true
    }

    fn enter(&self, state: &mut SlotState, access: Access) {
        match access {
            Access::Read => state.readers += 1,
            Access::Write => state.writers += 1,
        }
        state.last_used = self.tick();
    }

    fn pin(&self, sector: SectorId, access: Access) -> Pin<'_> {
        loop {
            let (index, pinned) = self.resolve(sector, Some(access));
            if !pinned {
                let slot = &self.slots[index];
                let mut state = slot.wait_io(slot.lock());
                // 等待期间槽位被换给了别的扇区，重新查找
                if state.sector != Some(sector) {
                    continue;
                }
                self.enter(&mut state, access);
            }

            return Pin {
                cache: self,
                index,
                access,
            };
        }
    }

    fn with_data<V>(&self, sector: SectorId, f: impl FnOnce(&SectorBuf) -> V) -> V {
        let pin = self.pin(sector, Access::Read);
        let data = self.slots[pin.index].data.read();
        f(&data)
    }

    fn with_data_mut<V>(&self, sector: SectorId, f: impl FnOnce(&mut SectorBuf) -> V) -> V {
        let pin = self.pin(sector, Access::Write);
        let mut data = self.slots[pin.index].data.write();
        f(&mut data)
    }
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        let slot = &self.cache.slots[self.index];
        let mut state = slot.lock();
        match self.access {
            Access::Read => state.readers -= 1,
            Access::Write => {
                state.writers -= 1;
                // 拷贝结束才置脏，与并发的回写不会丢更新
                state.dirty = true;
            }
        }
        let idle = state.is_idle();
        drop(state);

        if idle {
            slot.broadcast();
        }
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        self.flush_all();
    }
}
