//! MariaDB driver.
//!
//! MariaDB speaks the same dump/restore protocol as MySQL through
//! wire-compatible client tools, so this module is a thin re-export of
//! [`super::mysql::MysqlDriver`] rather than a duplicate implementation.

pub use super::mysql::MysqlDriver as MariadbDriver;
