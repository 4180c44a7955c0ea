//! 牺牲者选择策略
//!
//! 跳过正在 I/O 或已被预定的槽位，其余按优先级挑选：
//! 1. 空槽，直接返回；
//! 2. 无人读写的干净槽，取最久未用；
//! 3. 无人读写的槽（脏也行），取最久未用；
//! 4. 任意驻留槽，取最久未用，之后由调用者等读写结束。
//!
//! 全部槽位都忙时返回空，调用者应当等待而不是 panic。

use crate::SectorId;

/// 选择时所需的槽位快照
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotView {
    pub sector: Option<SectorId>,
    /// `in_io` 或已被预定
    pub busy: bool,
    /// 读写计数都为零
    pub idle: bool,
    pub dirty: bool,
    pub last_used: u64,
}

pub fn choose_victim(views: &[SlotView]) -> Option<usize> {
    let mut clean_idle: Option<usize> = None;
    let mut idle: Option<usize> = None;
    let mut any: Option<usize> = None;

    let older = |best: Option<usize>, candidate: &SlotView| {
        best.map_or(true, |best| candidate.last_used < views[best].last_used)
    };

    for (index, view) in views.iter().enumerate() {
        if view.busy {
            continue;
        }
        if view.sector.is_none() {
            return Some(index);
        }

        if view.idle && !view.dirty && older(clean_idle, view) {
            clean_idle = Some(index);
        }
        if view.idle && older(idle, view) {
            idle = Some(index);
        }
        if older(any, view) {
            any = Some(index);
        }
    }

    clean_idle.or(idle).or(any)
}
