/// Numeric status code carried by [`crate::Status`].
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const INVALID_ARG: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const NOT_SUPPORTED: status_code_t = 3;
    pub const OS_ERROR: status_code_t = 4;
    pub const UNKNOWN: status_code_t = 999;
}

/// Key-value store codes (1xxx).
pub mod KvCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 1000;
    pub const GET_FAILED: status_code_t = 1001;
    pub const PUT_FAILED: status_code_t = 1002;
    pub const ERASE_FAILED: status_code_t = 1003;
    pub const INC_FAILED: status_code_t = 1004;
    pub const OPEN_FAILED: status_code_t = 1005;
    /// A stored value could not be interpreted (e.g. a counter that is not
    /// an 8-byte integer).
    pub const BAD_VALUE: status_code_t = 1006;
}

/// Metadata cache codes (2xxx).
pub mod MdCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 2000;
    /// The entry still has outstanding lookup references; try again later.
    pub const RETRY: status_code_t = 2001;
    pub const EXISTS: status_code_t = 2002;
    pub const NOT_DIRECTORY: status_code_t = 2003;
    /// The flush queue was closed while an operation was blocked on it.
    pub const QUEUE_CLOSED: status_code_t = 2004;
    pub const INODE_ALLOC_FAILED: status_code_t = 2005;
    pub const SERIALIZE_FAILED: status_code_t = 2006;
}

/// Remote metadata authority codes (3xxx).
pub mod BackendCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const REQUEST_FAILED: status_code_t = 3001;
    pub const BAD_RESPONSE: status_code_t = 3002;
}

/// Human-readable name for a status code.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::NOT_SUPPORTED => "NotSupported",
        StatusCode::OS_ERROR => "OsError",
        StatusCode::UNKNOWN => "Unknown",

        KvCode::NOT_FOUND => "Kv::NotFound",
        KvCode::GET_FAILED => "Kv::GetFailed",
        KvCode::PUT_FAILED => "Kv::PutFailed",
        KvCode::ERASE_FAILED => "Kv::EraseFailed",
        KvCode::INC_FAILED => "Kv::IncFailed",
        KvCode::OPEN_FAILED => "Kv::OpenFailed",
        KvCode::BAD_VALUE => "Kv::BadValue",

        MdCode::NOT_FOUND => "Md::NotFound",
        MdCode::RETRY => "Md::Retry",
        MdCode::EXISTS => "Md::Exists",
        MdCode::NOT_DIRECTORY => "Md::NotDirectory",
        MdCode::QUEUE_CLOSED => "Md::QueueClosed",
        MdCode::INODE_ALLOC_FAILED => "Md::InodeAllocFailed",
        MdCode::SERIALIZE_FAILED => "Md::SerializeFailed",

        BackendCode::NOT_FOUND => "Backend::NotFound",
        BackendCode::REQUEST_FAILED => "Backend::RequestFailed",
        BackendCode::BAD_RESPONSE => "Backend::BadResponse",

        _ => "Unrecognized",
    }
}
