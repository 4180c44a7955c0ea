//! 磁盘上的 inode 记录
//!
//! 直接索引 → 一级索引块 → 二级索引块，逻辑扇区号的编码见
//! [`crate::inode`] 中的 `IndexPath`。

use core::mem;

use super::{SectorPtr, DIRECT_COUNT};
use crate::{MAGIC, SECTOR_SIZE};

#[derive(Debug, Clone)]
#[repr(C)]
pub struct DiskInode {
    /// 文件长度（字节），不用 usize 是为了严控布局
    pub length: u32,
    /// 魔数：用于发现损坏的记录
    magic: u32,
    /// 类型，见 [`InodeKind`]
    kind: u32,
    /// 直接索引
    pub direct: [SectorPtr; DIRECT_COUNT],
    /// 指向一个一级索引块
    pub indirect: SectorPtr,
    /// 指向一个二级索引块
    pub double_indirect: SectorPtr,
}

const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum InodeKind {
    #[default]
    File = 0,
    Directory = 1,
}

impl Default for DiskInode {
    fn default() -> Self {
        Self {
            length: 0,
            magic: 0,
            kind: InodeKind::File as u32,
            direct: [SectorPtr::UNALLOCATED; DIRECT_COUNT],
            indirect: SectorPtr::UNALLOCATED,
            double_indirect: SectorPtr::UNALLOCATED,
        }
    }
}

impl DiskInode {
    pub fn new(length: u32, kind: InodeKind) -> Self {
        Self {
            length,
            magic: MAGIC,
            kind: kind as u32,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn kind(&self) -> InodeKind {
        match self.kind {
            1 => InodeKind::Directory,
            _ => InodeKind::File,
        }
    }
}
