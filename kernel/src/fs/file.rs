//! Global open-file table and per-process fd tables
//!
//! Three levels of indirection, all index-based: an fd-table slot names a
//! global file entry, which names an inode slot. The counts mirror the
//! original accounting: `FileEntry.ref_count` is the number of fd slots
//! (across all processes) naming the entry, and an inode reference is taken
//! for every fd slot -- `open` takes one, fd-table duplication on fork takes
//! another, and every close puts one back.

use super::fat::Fat16Volume;
use super::inode::InodeTable;
use crate::error::{KernelError, KernelResult};

/// Size of the global open-file table.
pub const FILE_TABLE_SIZE: usize = 32;

/// Per-process fd table size.
pub const MAX_OPEN_FILES: usize = 16;

/// Open mode. The file system is read-only, so this is always `O_RDONLY`;
/// the field is kept because the open-file entry is the natural place for it.
pub const O_RDONLY: u32 = 0;

/// One slot of the global open-file table. `inode == None` means free.
#[derive(Debug, Clone, Copy)]
pub struct FileEntry {
    pub inode: Option<usize>,
    pub ref_count: u32,
    pub mode: u32,
}

impl FileEntry {
    const FREE: Self = Self {
        inode: None,
        ref_count: 0,
        mode: O_RDONLY,
    };
}

/// The global open-file table.
pub struct FileTable {
    entries: [FileEntry; FILE_TABLE_SIZE],
}

impl FileTable {
    pub const fn new() -> Self {
        Self {
            entries: [FileEntry::FREE; FILE_TABLE_SIZE],
        }
    }

    pub fn entry(&self, idx: usize) -> &FileEntry {
        &self.entries[idx]
    }

    fn find_free(&self) -> KernelResult<usize> {
        self.entries
            .iter()
            .position(|e| e.inode.is_none())
            .ok_or(KernelError::ResourceExhausted {
                resource: "file table",
            })
    }

    /// Live entries; diagnostic and test use.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.inode.is_some()).count()
    }
}

/// A process's fd table: each live slot names a global file-table entry.
#[derive(Debug, Clone, Copy)]
pub struct FdTable {
    slots: [Option<usize>; MAX_OPEN_FILES],
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_OPEN_FILES],
        }
    }

    pub fn get(&self, fd: usize) -> Option<usize> {
        self.slots.get(fd).copied().flatten()
    }

    fn find_free(&self) -> KernelResult<usize> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::ResourceExhausted { resource: "fds" })
    }

    /// Iterate the live slots as `(fd, file_index)`.
    pub fn live(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(fd, s)| s.map(|idx| (fd, idx)))
    }
}

/// Open `path` read-only into the first free fd of `fds`.
///
/// Slot claiming order follows the original protocol: fd slot, then global
/// file entry, then path resolution, then the inode reference. Nothing is
/// left claimed on failure.
pub fn open_file(
    fds: &mut FdTable,
    files: &mut FileTable,
    inodes: &mut InodeTable,
    volume: &Fat16Volume,
    path: &str,
) -> KernelResult<usize> {
    let fd = fds.find_free()?;
    let file_idx = files.find_free()?;
    let entry = volume.lookup(path)?;
    let inode_idx = inodes.get(&entry)?;

    files.entries[file_idx] = FileEntry {
        inode: Some(inode_idx),
        ref_count: 1,
        mode: O_RDONLY,
    };
    fds.slots[fd] = Some(file_idx);
    Ok(fd)
}

/// Close `fd`. Negative fds are a silent no-op; a dead or out-of-range fd is
/// an error.
pub fn close_file(
    fds: &mut FdTable,
    files: &mut FileTable,
    inodes: &mut InodeTable,
    fd: isize,
) -> KernelResult<usize> {
    if fd < 0 {
        return Ok(0);
    }
    let fd = fd as usize;
    let file_idx = fds
        .get(fd)
        .ok_or(KernelError::NotFound { resource: "fd" })?;
    fds.slots[fd] = None;
    release_file_ref(files, inodes, file_idx);
    Ok(0)
}

/// Drop one fd-slot reference to a file entry: put the inode reference, then
/// the entry's count; the entry frees when the count reaches zero.
pub fn release_file_ref(files: &mut FileTable, inodes: &mut InodeTable, file_idx: usize) {
    let entry = &mut files.entries[file_idx];
    let inode_idx = entry.inode.expect("file: release of free entry");
    inodes.put(inode_idx);

    assert!(entry.ref_count > 0, "file: ref_count past zero");
    entry.ref_count -= 1;
    if entry.ref_count == 0 {
        entry.inode = None;
    }
}

/// Duplicate every live slot of `fds` for a forked child: one more fd-slot
/// reference on each file entry and its inode.
pub fn clone_fd_table(
    fds: &FdTable,
    files: &mut FileTable,
    inodes: &mut InodeTable,
) -> FdTable {
    for (_, file_idx) in fds.live() {
        let entry = &mut files.entries[file_idx];
        entry.ref_count += 1;
        inodes.dup(entry.inode.expect("file: live slot without inode"));
    }
    *fds
}
