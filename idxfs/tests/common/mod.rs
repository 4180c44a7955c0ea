#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use idxfs::{
    Bitmap, BlockDevice, BufferCache, CacheConfig, FreeMap, InodeHandle, InodeKind, InodeRegistry,
    SectorId, SECTOR_SIZE,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 内存里的块设备，记录每个扇区被读写的次数
pub struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    reads: Mutex<Vec<usize>>,
    writes: Mutex<Vec<usize>>,
    total_reads: AtomicUsize,
    total_writes: AtomicUsize,
    /// 每次读设备前睡眠，用来放大并发缺失的窗口
    read_delay: Duration,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Arc<Self> {
        Self::with_read_delay(sectors, Duration::ZERO)
    }

    pub fn with_read_delay(sectors: usize, read_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            sectors: Mutex::new(vec![[0; SECTOR_SIZE]; sectors]),
            reads: Mutex::new(vec![0; sectors]),
            writes: Mutex::new(vec![0; sectors]),
            total_reads: AtomicUsize::new(0),
            total_writes: AtomicUsize::new(0),
            read_delay,
        })
    }

    pub fn raw(&self, sector: u32) -> [u8; SECTOR_SIZE] {
        self.sectors.lock().unwrap()[sector as usize]
    }

    pub fn fill(&self, sector: u32, byte: u8) {
        self.sectors.lock().unwrap()[sector as usize] = [byte; SECTOR_SIZE];
    }

    pub fn reads_of(&self, sector: u32) -> usize {
        self.reads.lock().unwrap()[sector as usize]
    }

    pub fn writes_of(&self, sector: u32) -> usize {
        self.writes.lock().unwrap()[sector as usize]
    }

    pub fn reads(&self) -> usize {
        self.total_reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.total_writes.load(Ordering::SeqCst)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
        self.reads.lock().unwrap()[block_id] += 1;
        self.total_reads.fetch_add(1, Ordering::SeqCst);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
        self.writes.lock().unwrap()[block_id] += 1;
        self.total_writes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn sector(raw: u32) -> SectorId {
    SectorId::new(raw)
}

pub fn cache(disk: &Arc<MemDisk>, slots: usize) -> Arc<BufferCache> {
    let dev: Arc<dyn BlockDevice> = disk.clone();
    Arc::new(BufferCache::with_config(dev, CacheConfig::with_slots(slots)))
}

/// 整块磁盘都交给位图管理，inode 记录也从中分配
pub struct Fixture {
    pub disk: Arc<MemDisk>,
    pub bitmap: Arc<Bitmap>,
    pub registry: Arc<InodeRegistry>,
}

impl Fixture {
    pub fn new(sectors: usize, slots: usize) -> Self {
        init_logger();
        let disk = MemDisk::new(sectors);
        let bitmap = Arc::new(Bitmap::new(SectorId::new(0), sectors));
        let free_map: Arc<dyn FreeMap> = bitmap.clone();
        let registry = InodeRegistry::new(cache(&disk, slots), free_map);
        Self {
            disk,
            bitmap,
            registry,
        }
    }

    pub fn cache(&self) -> &Arc<BufferCache> {
        self.registry.cache()
    }

    /// 分配一个记录扇区，创建并打开一个文件
    pub fn new_file(&self, length: usize) -> InodeHandle {
        let sector = self.bitmap.alloc(1).expect("no sector for the inode record");
        self.registry
            .create(sector, length, InodeKind::File)
            .expect("create failed");
        self.registry.open(sector)
    }
}

/// 可重复的测试数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
