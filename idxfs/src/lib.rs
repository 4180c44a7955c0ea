/* idxfs 的整体架构，自上而下 */

// 索引节点层：文件的打开、读写、扩展与延迟删除
mod inode;

// 空闲扇区分配器接口
mod free_map;

// 磁盘数据结构层：inode 记录与间接索引块
mod layout;

// 块缓存层：固定槽位的扇区缓存，以及后台回写/预读
mod cache;

pub mod config;
mod error;
mod sector;

pub use block_dev::BlockDevice;

pub use self::{
    cache::{BufferCache, CacheDaemon, CacheStats},
    config::CacheConfig,
    error::Error,
    free_map::{Bitmap, FreeMap},
    inode::{InodeHandle, InodeKind, InodeRegistry},
    layout::{DIRECT_COUNT, INDIRECT_COUNT, MAX_SECTORS},
    sector::SectorId,
};

pub use config::SECTOR_SIZE;

/// inode 记录的魔数，"INOD"
pub const MAGIC: u32 = 0x494e_4f44;
