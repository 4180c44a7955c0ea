use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 空闲扇区分配器已耗尽
    NoSpace,
    /// 偏移超出了三级索引可寻址的范围
    OutOfRange,
    /// inode 正被禁止写入
    WriteDenied,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoSpace => "no free sector left",
            Error::OutOfRange => "offset beyond the addressable range of an inode",
            Error::WriteDenied => "writes to this inode are denied",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}
