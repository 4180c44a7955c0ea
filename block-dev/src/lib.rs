//! # 块设备接口层
//!
//! 块设备以**扇区**为单位存储数据；[`BlockDevice`] 是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 读写均为同步操作，且每次恰好一个扇区。设备出错时由驱动自行 panic，
//! 上层不做重试。

#![no_std]

use core::any::Any;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
