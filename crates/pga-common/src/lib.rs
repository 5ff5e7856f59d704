//! PGA Common: 共享错误类型与哈希工具
//!
//! 策略图审计工具各 crate 共用的错误分类 (`PgaError`) 与 blake3 / merkle 哈希函数。

pub mod error;
pub mod hash;

/// PGA 通用错误类型
pub use error::PgaError;
