newtype_id!(
    /// A 64-bit inode number, the stable handle for one metadata entry.
    InodeId(u64)
);

newtype_id!(
    /// A numeric user id.
    Uid(u32)
);

newtype_id!(
    /// A numeric group id.
    Gid(u32)
);

impl InodeId {
    /// The "no inode" sentinel. Valid entries never carry this id.
    pub const NONE: InodeId = InodeId(0);

    /// Whether this id refers to an actual entry.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}
