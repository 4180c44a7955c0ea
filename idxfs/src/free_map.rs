//! # 空闲扇区分配器
//!
//! 空闲空间管理属于外部协作者，这里只约定接口 [`FreeMap`]；
//! 另附一个内存中的位图实现 [`Bitmap`]，供宿主环境和测试使用。

use spin::Mutex;

use crate::SectorId;

/// 空闲扇区分配器特质
pub trait FreeMap: Send + Sync {
    /// 分配连续的 `count` 个扇区并返回首扇区号；空间不足时返回空
    fn alloc(&self, count: usize) -> Option<SectorId>;
    /// 归还从 `start` 起连续的 `count` 个扇区
    fn release(&self, start: SectorId, count: usize);
}

/// 位组：一个 `u64` 记录 64 个扇区的分配情况
const GROUP_BITS: usize = 64;

/// 位图分配器，管理 `[start, start + capacity)` 内的扇区
#[derive(Debug)]
pub struct Bitmap {
    start: SectorId,
    capacity: usize,
    groups: Mutex<Vec<u64>>,
}

/// 位图内的扇区编号
struct BitId(usize);

impl Bitmap {
    pub fn new(start: SectorId, capacity: usize) -> Self {
        let mut groups = vec![0u64; capacity.div_ceil(GROUP_BITS)];
        // 末尾多出来的位视为已占用，永远分配不出去
        let tail = capacity % GROUP_BITS;
        if tail != 0 {
            if let Some(last) = groups.last_mut() {
                *last = !0u64 << tail;
            }
        }

        Self {
            start,
            capacity,
            groups: Mutex::new(groups),
        }
    }

    /// 位图所指示区域的总扇区数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 已分配的扇区数
    pub fn used(&self) -> usize {
        let groups = self.groups.lock();
        let padding = groups.len() * GROUP_BITS - self.capacity;
        groups.iter().map(|g| g.count_ones() as usize).sum::<usize>() - padding
    }

    /// 某扇区当前是否已分配
    pub fn is_allocated(&self, sector: SectorId) -> bool {
        let Some(index) = self.index_of(sector) else {
            return false;
        };
        let (group, bit) = BitId(index).decode();
        self.groups.lock()[group] & (1 << bit) != 0
    }

    fn index_of(&self, sector: SectorId) -> Option<usize> {
        let index = sector.raw().checked_sub(self.start.raw())? as usize;
        (index < self.capacity).then_some(index)
    }

    /// 单个扇区：找第一个还有 0 的位组
    fn alloc_one(groups: &mut [u64]) -> Option<usize> {
        let (group, bit) = groups.iter().enumerate().find_map(|(group, &bits)| {
            (bits != u64::MAX).then_some((group, bits.trailing_ones()))
        })?;

        groups[group] |= 1 << bit;
        Some(BitId::encode(group, bit as usize))
    }

    /// 连续多个扇区：首次适配
    fn alloc_run(groups: &mut [u64], capacity: usize, count: usize) -> Option<usize> {
        let is_free = |groups: &[u64], index: usize| {
            let (group, bit) = BitId(index).decode();
            groups[group] & (1 << bit) == 0
        };

        let mut run_start = 0;
        let mut run_len = 0;
        for index in 0..capacity {
            if is_free(groups, index) {
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;
                if run_len == count {
                    for index in run_start..run_start + count {
                        let (group, bit) = BitId(index).decode();
                        groups[group] |= 1 << bit;
                    }
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }

        None
    }
}

impl FreeMap for Bitmap {
    fn alloc(&self, count: usize) -> Option<SectorId> {
        if count == 0 || count > self.capacity {
            return None;
        }

        let mut groups = self.groups.lock();
        let index = if count == 1 {
            Self::alloc_one(&mut groups)
        } else {
            Self::alloc_run(&mut groups, self.capacity, count)
        }?;

        Some(self.start + index as u32)
    }

    fn release(&self, start: SectorId, count: usize) {
        let first = self
            .index_of(start)
            .expect("releasing a sector outside the bitmap");
        assert!(first + count <= self.capacity);

        let mut groups = self.groups.lock();
        for index in first..first + count {
            let (group, bit) = BitId(index).decode();
            // 编号一定得有对应的位
            assert_ne!(
                groups[group] & (1 << bit),
                0,
                "double release of {}",
                start + (index - first) as u32
            );
            groups[group] &= !(1 << bit);
        }
    }
}

impl BitId {
    #[inline]
    fn encode(group: usize, bit: usize) -> usize {
        group * GROUP_BITS + bit
    }

    #[inline]
    fn decode(self) -> (usize, usize) {
        (self.0 / GROUP_BITS, self.0 % GROUP_BITS)
    }
}
