//! 打开的 inode 表
//!
//! 以记录所在扇区为键，同一扇区只对应一个 [`Inode`]。

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use spin::Mutex;

use super::{Inode, InodeHandle, InodeKind};
use crate::layout::{DiskInode, MAX_SECTORS};
use crate::{BufferCache, Error, FreeMap, SectorId, SECTOR_SIZE};

pub struct InodeRegistry {
    cache: Arc<BufferCache>,
    free_map: Arc<dyn FreeMap>,
    open: Mutex<BTreeMap<SectorId, Arc<Inode>>>,
}

impl InodeRegistry {
    pub fn new(cache: Arc<BufferCache>, free_map: Arc<dyn FreeMap>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            free_map,
            open: Mutex::default(),
        })
    }

    #[inline]
    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    /// 在 `sector` 处写入一条新的 inode 记录，并为 `length` 字节预先分配清零的扇区。
    ///
    /// `sector` 由调用者分配。空间不足时归还已分配的扇区，记录扇区清零。
    pub fn create(&self, sector: SectorId, length: usize, kind: InodeKind) -> Result<(), Error> {
        let sectors = length.div_ceil(SECTOR_SIZE);
        if sectors > MAX_SECTORS {
            return Err(Error::OutOfRange);
        }

        let disk = DiskInode::new(0, kind);
        self.cache
            .map_mut(sector, 0, |record: &mut DiskInode| *record = disk.clone());
        let inode = Inode::new(sector, disk, self.cache.clone(), self.free_map.clone());

        for index in 0..sectors {
            if let Err(err) = inode.extend(index) {
                let freed = inode.free_sectors();
                self.cache.modify(sector, |buf| buf.fill(0));
                log::warn!(
                    "creating inode {sector} failed at sector {index}, {freed} sector(s) given back"
                );
                return Err(err);
            }
        }
        inode.grow_to(length);

        log::debug!("created {kind:?} inode {sector} of {length} bytes");
        Ok(())
    }

    /// 打开 `sector` 处的 inode；已经打开时共享同一个 [`Inode`]
    pub fn open(self: &Arc<Self>, sector: SectorId) -> InodeHandle {
        let existing = {
            let open = self.open.lock();
            open.get(&sector).map(|inode| {
                inode.meta.lock().open_cnt += 1;
                inode.clone()
            })
        };
        let inode = match existing {
            Some(inode) => inode,
            None => {
                let disk = self.cache.map(sector, 0, DiskInode::clone);
                assert!(disk.is_valid(), "no inode record at {sector}");
                let fresh = Arc::new(Inode::new(
                    sector,
                    disk,
                    self.cache.clone(),
                    self.free_map.clone(),
                ));

                let mut open = self.open.lock();
                let inode = open.entry(sector).or_insert(fresh).clone();
                inode.meta.lock().open_cnt += 1;
                inode
            }
        };

        log::trace!("opened inode {sector}");
        InodeHandle {
            registry: self.clone(),
            inode,
            denies_write: AtomicBool::new(false),
        }
    }

    /// `sector` 处的 inode 当前被打开的次数
    pub fn open_count(&self, sector: SectorId) -> usize {
        self.open
            .lock()
            .get(&sector)
            .map_or(0, |inode| inode.meta.lock().open_cnt)
    }

    #[inline]
    pub fn is_open(&self, sector: SectorId) -> bool {
        self.open.lock().contains_key(&sector)
    }

    /// 关闭一次；最后一次关闭时注销，若已标记删除则归还它的所有扇区
    pub(super) fn release(&self, inode: &Arc<Inode>) {
        let removed = {
            let mut open = self.open.lock();
            let mut meta = inode.meta.lock();
            assert!(meta.open_cnt > 0);
            meta.open_cnt -= 1;
            if meta.open_cnt > 0 {
                return;
            }
            open.remove(&inode.sector);
            meta.removed
        };

        log::trace!("inode {} fully closed", inode.sector);
        if removed {
            let freed = inode.free_sectors();
            self.free_map.release(inode.sector, 1);
            log::debug!(
                "inode {} deleted, {} sector(s) given back",
                inode.sector,
                freed + 1
            );
        }
    }
}
