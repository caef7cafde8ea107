//! Read-only FAT16 file system and the UNIX-style open-file model
//!
//! [`fat`] reads the on-disk format; [`inode`] caches directory entries in
//! core; [`file`] layers the global open-file table and per-process fd
//! tables on top, with reference counting across `fork`/`exec`/`exit`.

pub mod fat;
pub mod file;
pub mod inode;

pub use fat::Fat16Volume;
pub use file::{FdTable, FileTable, MAX_OPEN_FILES};
pub use inode::InodeTable;
