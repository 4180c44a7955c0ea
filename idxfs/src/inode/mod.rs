//! # 索引节点层
//!
//! 每个打开的文件对应一个内存中的 [`Inode`]，同一扇区的多次打开共享它。
//! 上层拿到的是 [`InodeHandle`]：克隆即重新打开，析构即关闭，
//! 最后一次关闭时由 [`InodeRegistry`] 统一收尾。
//!
//! 文件是稀疏的：长度以内未分配的扇区读出全零，写入时才分配。
//!
//! 并发读写只保证单个扇区内的字节区间原子，不保证整个文件级别的可串行化。

mod index;
mod registry;

use std::sync::atomic::{self, AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex, PoisonError};

use spin::Mutex as SpinMutex;

use self::index::IndexPath;
use crate::layout::{DiskInode, IndirectBlock, SectorPtr, EMPTY_INDIRECT};
use crate::{BufferCache, Error, FreeMap, SectorId, SECTOR_SIZE};

pub use self::registry::InodeRegistry;
pub use crate::layout::InodeKind;

pub(crate) struct Inode {
    /// inode 记录所在扇区，同时也是它的身份
    sector: SectorId,
    cache: Arc<BufferCache>,
    free_map: Arc<dyn FreeMap>,
    /// 缓存一份 inode 记录；每次修改都会立即经由块缓存写回
    disk: SpinMutex<DiskInode>,
    meta: SpinMutex<Meta>,
    /// 串行化扩展，持有期间会访问块缓存
    extend_lock: Mutex<()>,
    /// 串行化长度的增长
    length_lock: Mutex<()>,
    /// 高水位：前多少个逻辑扇区已经被扩展过
    extended: AtomicUsize,
}

#[derive(Debug, Default)]
struct Meta {
    open_cnt: usize,
    removed: bool,
    deny_write_cnt: usize,
}

/// 打开者持有的句柄
pub struct InodeHandle {
    registry: Arc<InodeRegistry>,
    inode: Arc<Inode>,
    /// 本句柄是否禁止了写入
    denies_write: AtomicBool,
}

impl Inode {
    fn new(
        sector: SectorId,
        disk: DiskInode,
        cache: Arc<BufferCache>,
        free_map: Arc<dyn FreeMap>,
    ) -> Self {
        let extended = (disk.length as usize).div_ceil(SECTOR_SIZE);
        Self {
            sector,
            cache,
            free_map,
            disk: SpinMutex::new(disk),
            meta: SpinMutex::default(),
            extend_lock: Mutex::new(()),
            length_lock: Mutex::new(()),
            extended: AtomicUsize::new(extended),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.disk.lock().length as usize
    }

    #[inline]
    pub fn kind(&self) -> InodeKind {
        self.disk.lock().kind()
    }

    /// 字节偏移所在的扇区；未分配时返回空
    pub fn sector_for(&self, offset: usize) -> Result<Option<SectorId>, Error> {
        let path = IndexPath::of(offset / SECTOR_SIZE)?;
        Ok(self.translate(path))
    }

    fn translate(&self, path: IndexPath) -> Option<SectorId> {
        match path {
            IndexPath::Direct(i) => self.disk.lock().direct[i].get(),
            IndexPath::Indirect(i) => {
                let block = self.disk.lock().indirect.get()?;
                self.entry(block, i)
            }
            IndexPath::DoubleIndirect(outer, inner) => {
                let top = self.disk.lock().double_indirect.get()?;
                let block = self.entry(top, outer)?;
                self.entry(block, inner)
            }
        }
    }

    /// 为第 `index` 个逻辑扇区分配数据扇区，缺失的索引块一并分配。
    ///
    /// 已经分配过时直接返回原扇区，并发扩展同一索引只会分配一次。
    pub fn extend(&self, index: usize) -> Result<SectorId, Error> {
        let path = IndexPath::of(index)?;
        let _guard = self
            .extend_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if index < self.extended.load(atomic::Ordering::Acquire) {
            if let Some(sector) = self.translate(path) {
                return Ok(sector);
            }
        }

        let sector = match path {
            IndexPath::Direct(i) => {
                let existing = self.disk.lock().direct[i].get();
                match existing {
                    Some(sector) => sector,
                    None => {
                        let sector = self.alloc_sector(&[0; SECTOR_SIZE])?;
                        self.update(|disk| disk.direct[i] = sector.into());
                        sector
                    }
                }
            }
            IndexPath::Indirect(i) => {
                let block = self.index_root(|disk| &mut disk.indirect)?;
                self.link(block, i, &[0; SECTOR_SIZE])?
            }
            IndexPath::DoubleIndirect(outer, inner) => {
                let top = self.index_root(|disk| &mut disk.double_indirect)?;
                let block = self.link(top, outer, &EMPTY_INDIRECT)?;
                self.link(block, inner, &[0; SECTOR_SIZE])?
            }
        };

        self.extended.fetch_max(index + 1, atomic::Ordering::Release);
        log::debug!("inode {} extended sector {index} to {sector}", self.sector);
        Ok(sector)
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let length = self.len();
        if offset >= length {
            return 0;
        }
        let end = (offset + buf.len()).min(length);

        let mut pos = offset;
        while pos < end {
            let index = pos / SECTOR_SIZE;
            let in_sector = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(end - pos);
            let dst = &mut buf[pos - offset..pos - offset + chunk];

            match self.sector_for(pos) {
                Ok(Some(sector)) => self.cache.read(sector, in_sector, dst),
                // 空洞
                _ => dst.fill(0),
            }
            pos += chunk;

            let next = (index + 1) * SECTOR_SIZE;
            if next < length {
                if let Ok(Some(sector)) = self.sector_for(next) {
                    self.cache.read_ahead(sector);
                }
            }
        }

        end - offset
    }

    /// 写入字节，必要时扩展文件。
    ///
    /// 中途扩展失败时返回已写入的字节数，不回滚；一个字节都没写成时返回错误。
    pub fn try_write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, Error> {
        if self.meta.lock().deny_write_cnt > 0 {
            return Err(Error::WriteDenied);
        }

        let mut written = 0;
        let mut failure = None;
        while written < buf.len() {
            let pos = offset + written;
            let in_sector = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(buf.len() - written);

            let sector = match self.sector_for(pos) {
                Ok(Some(sector)) => Ok(sector),
                Ok(None) => self.extend(pos / SECTOR_SIZE),
                Err(err) => Err(err),
            };
            let sector = match sector {
                Ok(sector) => sector,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            self.cache
                .write(sector, in_sector, &buf[written..written + chunk]);
            written += chunk;
        }

        if written > 0 {
            self.grow_to(offset + written);
        }
        match failure {
            Some(err) if written == 0 => Err(err),
            _ => Ok(written),
        }
    }

    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.try_write_at(offset, buf).unwrap_or(0)
    }

    fn grow_to(&self, end: usize) {
        let _guard = self
            .length_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if end > self.len() {
            let length = end as u32;
            self.update(|disk| disk.length = length);
        }
    }

    /// 归还所有数据扇区与索引块，不含 inode 记录本身
    fn free_sectors(&self) -> usize {
        let (direct, indirect, double_indirect) = {
            let disk = self.disk.lock();
            (disk.direct, disk.indirect, disk.double_indirect)
        };

        let mut sectors: Vec<SectorId> = direct.iter().filter_map(|ptr| ptr.get()).collect();
        if let Some(block) = indirect.get() {
            sectors.extend(self.entries(block));
            sectors.push(block);
        }
        if let Some(top) = double_indirect.get() {
            for block in self.entries(top) {
                sectors.extend(self.entries(block));
                sectors.push(block);
            }
            sectors.push(top);
        }

        for &sector in &sectors {
            self.free_map.release(sector, 1);
        }
        sectors.len()
    }
}

impl Inode {
    /// 同时修改缓存的记录与块缓存里的记录
    fn update(&self, f: impl Fn(&mut DiskInode)) {
        f(&mut *self.disk.lock());
        self.cache.map_mut(self.sector, 0, f);
    }

    fn alloc_sector(&self, fill: &[u8; SECTOR_SIZE]) -> Result<SectorId, Error> {
        let Some(sector) = self.free_map.alloc(1) else {
            log::warn!("inode {} ran out of free sectors", self.sector);
            return Err(Error::NoSpace);
        };
        self.cache.modify(sector, |buf| buf.copy_from_slice(fill));
        Ok(sector)
    }

    /// inode 记录直接指向的索引块，缺失时分配一个空的
    fn index_root(&self, select: fn(&mut DiskInode) -> &mut SectorPtr) -> Result<SectorId, Error> {
        let existing = select(&mut *self.disk.lock()).get();
        if let Some(block) = existing {
            return Ok(block);
        }
        let block = self.alloc_sector(&EMPTY_INDIRECT)?;
        self.update(|disk| *select(disk) = block.into());
        Ok(block)
    }

    /// 索引块的第 `i` 项，缺失时分配一个以 `fill` 填充的扇区挂上去
    fn link(&self, block: SectorId, i: usize, fill: &[u8; SECTOR_SIZE]) -> Result<SectorId, Error> {
        if let Some(sector) = self.entry(block, i) {
            return Ok(sector);
        }
        let sector = self.alloc_sector(fill)?;
        self.cache
            .map_mut(block, 0, |entries: &mut IndirectBlock| entries[i] = sector.into());
        Ok(sector)
    }

    fn entry(&self, block: SectorId, i: usize) -> Option<SectorId> {
        self.cache
            .map(block, 0, |entries: &IndirectBlock| entries[i].get())
    }

    fn entries(&self, block: SectorId) -> Vec<SectorId> {
        let entries = self.cache.map(block, 0, |entries: &IndirectBlock| *entries);
        entries.iter().filter_map(|ptr| ptr.get()).collect()
    }
}

impl InodeHandle {
    /// inode 编号，即记录所在扇区
    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.inode.sector
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inode.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn kind(&self) -> InodeKind {
        self.inode.kind()
    }

    pub fn sector_for(&self, offset: usize) -> Result<Option<SectorId>, Error> {
        self.inode.sector_for(offset)
    }

    /// 从 `offset` 起读入 `buf`，返回读到的字节数；越过文件末尾的部分不读
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    /// 从 `offset` 起写入 `buf`，返回写入的字节数；禁止写入时返回 0
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.inode.write_at(offset, buf)
    }

    pub fn try_write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, Error> {
        self.inode.try_write_at(offset, buf)
    }

    /// 标记删除，最后一次关闭时才真正归还扇区
    pub fn remove(&self) {
        self.inode.meta.lock().removed = true;
        log::debug!("inode {} marked removed", self.inode.sector);
    }

    /// 禁止写入，直到本句柄 [`allow_write`](Self::allow_write) 或被关闭
    pub fn deny_write(&self) {
        if self.denies_write.swap(true, atomic::Ordering::AcqRel) {
            return;
        }
        let mut meta = self.inode.meta.lock();
        meta.deny_write_cnt += 1;
        assert!(meta.deny_write_cnt <= meta.open_cnt);
    }

    pub fn allow_write(&self) {
        if !self.denies_write.swap(false, atomic::Ordering::AcqRel) {
            return;
        }
        let mut meta = self.inode.meta.lock();
        assert!(meta.deny_write_cnt > 0);
        meta.deny_write_cnt -= 1;
    }

    pub fn close(self) {}
}

impl Clone for InodeHandle {
    fn clone(&self) -> Self {
        self.inode.meta.lock().open_cnt += 1;
        Self {
            registry: self.registry.clone(),
            inode: self.inode.clone(),
            denies_write: AtomicBool::new(false),
        }
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        self.allow_write();
        self.registry.release(&self.inode);
    }
}
