//! POSIX-style attribute struct handed to the filesystem-call adapter.

/// Attributes exported for getattr/lookup replies.
///
/// Timestamps keep their separate second and nanosecond fields; both are
/// copied verbatim from the cached record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileAttr {
    pub ino: u64,
    pub size: u64,
    /// 512-byte blocks allocated.
    pub blocks: u64,
    pub atime: i64,
    pub atime_nsec: u32,
    pub mtime: i64,
    pub mtime_nsec: u32,
    pub ctime: i64,
    pub ctime_nsec: u32,
    /// File type + permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

/// Preferred I/O block size reported to the kernel.
pub const EXPORT_BLKSIZE: u32 = 4096;

/// Blocks figure for a byte size, rounded up to whole 512-byte units.
pub fn blocks_for(size: u64) -> u64 {
    size.div_ceil(512)
}
