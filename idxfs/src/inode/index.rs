//! ## 块索引编码
//!
//! - 逻辑索引小于 [`DIRECT_CAP`] 时直接落在 inode 记录里；
//! - 剔去直接索引的部分后，小于 [`INDIRECT_COUNT`] 时落在一级索引块里；
//! - 再剔去一级索引的部分，除以 [`INDIRECT_COUNT`] 得到二级索引块里的位置，
//!   取模得到它所指向的一级索引块里的位置。

use crate::layout::{DIRECT_CAP, INDIRECT1_CAP, INDIRECT2_CAP, INDIRECT_COUNT};
use crate::Error;

/// 一个逻辑扇区索引在三级索引里的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexPath {
    Direct(usize),
    Indirect(usize),
    /// （二级索引块内的位置，一级索引块内的位置）
    DoubleIndirect(usize, usize),
}

impl IndexPath {
    pub fn of(index: usize) -> Result<Self, Error> {
        if index < DIRECT_CAP {
            Ok(Self::Direct(index))
        } else if index < INDIRECT1_CAP {
            Ok(Self::Indirect(index - DIRECT_CAP))
        } else if index < INDIRECT2_CAP {
            let index = index - INDIRECT1_CAP;
            Ok(Self::DoubleIndirect(
                index / INDIRECT_COUNT,
                index % INDIRECT_COUNT,
            ))
        } else {
            Err(Error::OutOfRange)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_SECTORS;

    #[test]
    fn range_boundaries() {
        assert_eq!(Ok(IndexPath::Direct(0)), IndexPath::of(0));
        assert_eq!(Ok(IndexPath::Direct(122)), IndexPath::of(122));
        assert_eq!(Ok(IndexPath::Indirect(0)), IndexPath::of(123));
        assert_eq!(Ok(IndexPath::Indirect(127)), IndexPath::of(250));
        assert_eq!(Ok(IndexPath::DoubleIndirect(0, 0)), IndexPath::of(251));
        assert_eq!(Ok(IndexPath::DoubleIndirect(0, 127)), IndexPath::of(378));
        assert_eq!(Ok(IndexPath::DoubleIndirect(1, 0)), IndexPath::of(379));
        assert_eq!(
            Ok(IndexPath::DoubleIndirect(127, 127)),
            IndexPath::of(MAX_SECTORS - 1)
        );
    }

    #[test]
    fn past_the_last_sector_is_out_of_range() {
        assert_eq!(Err(Error::OutOfRange), IndexPath::of(MAX_SECTORS));
        assert_eq!(Err(Error::OutOfRange), IndexPath::of(usize::MAX));
    }

    #[test]
    fn every_index_has_a_distinct_path() {
        let mut seen = std::collections::HashSet::new();
        for index in 0..MAX_SECTORS {
            let path = IndexPath::of(index).unwrap();
            assert!(seen.insert(path), "{index} collides");
        }
    }
}
