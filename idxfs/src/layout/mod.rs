//! # 磁盘数据结构层
//!
//! 本层只定义两种磁盘格式：
//! - inode 记录：恰好占满一个扇区；
//! - 间接索引块：整个扇区连续存储扇区指针。
//!
//! 指针在磁盘上是 `u32`，全 1 表示"未分配"（0 号扇区是合法扇区）。

mod inode;
pub use inode::{DiskInode, InodeKind};

use crate::{SectorId, SECTOR_SIZE};

/// 间接索引块的指针容量
pub const INDIRECT_COUNT: usize = SECTOR_SIZE / 4;
/// 直接索引的指针个数，恰好把 inode 记录撑满一个扇区
pub const DIRECT_COUNT: usize = 123;

/// 直接索引时的编号容量
pub const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
pub const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT_COUNT;
/// 用上二级索引时的编号容量
pub const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT_COUNT * INDIRECT_COUNT;
/// 单个文件最多能寻址的扇区数
pub const MAX_SECTORS: usize = INDIRECT2_CAP;

/// 间接索引块
pub type IndirectBlock = [SectorPtr; INDIRECT_COUNT];

/// 磁盘上的扇区指针
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SectorPtr(u32);

impl SectorPtr {
    pub const UNALLOCATED: Self = Self(u32::MAX);

    #[inline]
    pub fn get(self) -> Option<SectorId> {
        (self != Self::UNALLOCATED).then_some(SectorId::new(self.0))
    }
}

impl Default for SectorPtr {
    fn default() -> Self {
        Self::UNALLOCATED
    }
}

impl From<Option<SectorId>> for SectorPtr {
    fn from(sector: Option<SectorId>) -> Self {
        sector.map_or(Self::UNALLOCATED, |s| Self(s.raw()))
    }
}

impl From<SectorId> for SectorPtr {
    fn from(sector: SectorId) -> Self {
        Self(sector.raw())
    }
}

/// 全新间接索引块的内容：全部未分配
pub const EMPTY_INDIRECT: [u8; SECTOR_SIZE] = [0xff; SECTOR_SIZE];

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn layouts_fill_one_sector() {
        assert_eq!(SECTOR_SIZE, mem::size_of::<DiskInode>());
        assert_eq!(SECTOR_SIZE, mem::size_of::<IndirectBlock>());
    }

    #[test]
    fn unallocated_is_all_ones_and_zero_is_valid() {
        assert_eq!(None, SectorPtr::UNALLOCATED.get());
        assert_eq!(Some(SectorId::new(0)), SectorPtr::from(SectorId::new(0)).get());
        assert_eq!(SectorPtr::UNALLOCATED, SectorPtr::from(None));

        let raw = u32::from_ne_bytes(EMPTY_INDIRECT[..4].try_into().unwrap());
        assert_eq!(u32::MAX, raw);
    }

    #[test]
    fn addressable_range() {
        assert_eq!(123 + 128 + 128 * 128, MAX_SECTORS);
    }
}
