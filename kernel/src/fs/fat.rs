//! Read-only FAT16 volume
//!
//! The boot firmware leaves the raw disk image in RAM; the volume is a view
//! over it. The BIOS parameter block is found through the MBR: the first
//! partition entry at offset 0x1BE carries the partition's LBA, and the BPB
//! is the first sector of that partition. Only 8.3 files in the root
//! directory exist; there are no subdirectories and nothing is ever written.

use crate::error::{KernelError, KernelResult};

/// Sector size assumed when turning the partition LBA into a byte offset.
pub const BYTES_PER_SECTOR: usize = 512;

/// Size of an on-disk directory entry.
pub const DIR_ENTRY_SIZE: usize = 32;

/// FAT16 end-of-chain marker; any entry `>=` this value terminates a chain.
pub const END_OF_DATA: u16 = 0xFFF8;

/// First byte of the MBR partition table.
const MBR_PARTITION_OFFSET: usize = 0x1BE;
/// Offset of the starting-LBA field inside a partition entry.
const PARTITION_LBA_OFFSET: usize = 8;

/// Directory entry first-byte markers.
const ENTRY_EMPTY: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

/// Attribute value marking an entry that is not a plain file (long-name
/// metadata); such entries are skipped during the root scan.
const ATTR_INVALID_FILE: u8 = 0x0F;

// ---------------------------------------------------------------------------
// BPB
// ---------------------------------------------------------------------------

/// Geometry parsed out of the BIOS parameter block, with the derived byte
/// offsets of each on-disk region (relative to the start of the image).
#[derive(Debug, Clone, Copy)]
struct Geometry {
    bytes_per_cluster: usize,
    root_entry_count: usize,
    fat_offset: usize,
    root_dir_offset: usize,
    data_offset: usize,
}

impl Geometry {
    fn parse(image: &[u8], partition_base: usize) -> Self {
        let bpb = &image[partition_base..partition_base + BYTES_PER_SECTOR];
        assert_eq!(
            u16::from_le_bytes([bpb[510], bpb[511]]),
            0xAA55,
            "fat: invalid boot signature"
        );

        let bytes_per_sector = u16::from_le_bytes([bpb[11], bpb[12]]) as usize;
        let sectors_per_cluster = bpb[13] as usize;
        let reserved_sectors = u16::from_le_bytes([bpb[14], bpb[15]]) as usize;
        let fat_count = bpb[16] as usize;
        let root_entry_count = u16::from_le_bytes([bpb[17], bpb[18]]) as usize;
        let sectors_per_fat = u16::from_le_bytes([bpb[22], bpb[23]]) as usize;

        let fat_offset = partition_base + reserved_sectors * bytes_per_sector;
        let root_dir_offset = fat_offset + fat_count * sectors_per_fat * bytes_per_sector;
        let data_offset = root_dir_offset + root_entry_count * DIR_ENTRY_SIZE;

        Self {
            bytes_per_cluster: sectors_per_cluster * bytes_per_sector,
            root_entry_count,
            fat_offset,
            root_dir_offset,
            data_offset,
        }
    }
}

// ---------------------------------------------------------------------------
// Directory entries
// ---------------------------------------------------------------------------

/// A root-directory entry, decoded from its packed 32-byte form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirEntryInfo {
    /// Index of the entry in the root directory; the inode cache key.
    pub dir_index: usize,
    /// 8-byte name, space padded.
    pub name: [u8; 8],
    /// 3-byte extension, space padded.
    pub ext: [u8; 3],
    /// First cluster of the file's data chain.
    pub first_cluster: u16,
    /// File size in bytes.
    pub size: u32,
}

impl DirEntryInfo {
    fn decode(dir_index: usize, raw: &[u8]) -> Self {
        let mut name = [0u8; 8];
        let mut ext = [0u8; 3];
        name.copy_from_slice(&raw[0..8]);
        ext.copy_from_slice(&raw[8..11]);
        Self {
            dir_index,
            name,
            ext,
            first_cluster: u16::from_le_bytes([raw[26], raw[27]]),
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    /// Render the 8.3 name as `NAME.EXT`, NUL-terminated, into a 13-byte
    /// buffer. Returns the rendered length (excluding the NUL).
    pub fn display_name(&self) -> ([u8; 13], usize) {
        let mut out = [0u8; 13];
        let mut n = 0;
        for &b in self.name.iter().take_while(|&&b| b != b' ') {
            out[n] = b;
            n += 1;
        }
        if self.ext[0] != b' ' {
            out[n] = b'.';
            n += 1;
            for &b in self.ext.iter().take_while(|&&b| b != b' ') {
                out[n] = b;
                n += 1;
            }
        }
        (out, n)
    }
}

/// Split `path` into a space-padded 8-byte name and 3-byte extension.
///
/// There are no subdirectories, so a `/` anywhere is an error, as is an
/// over-long name or extension.
pub fn split_path(path: &str) -> KernelResult<([u8; 8], [u8; 3])> {
    if path.is_empty() || path.contains('/') {
        return Err(KernelError::InvalidArgument { name: "path" });
    }
    let (stem, ext_part) = match path.split_once('.') {
        Some((s, e)) => (s, e),
        None => (path, ""),
    };
    if stem.is_empty() || stem.len() > 8 || ext_part.len() > 3 || ext_part.contains('.') {
        return Err(KernelError::InvalidArgument { name: "path" });
    }

    let mut name = [b' '; 8];
    let mut ext = [b' '; 3];
    name[..stem.len()].copy_from_slice(stem.as_bytes());
    ext[..ext_part.len()].copy_from_slice(ext_part.as_bytes());
    Ok((name, ext))
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// A mounted read-only FAT16 volume over an in-memory disk image.
pub struct Fat16Volume {
    disk: *const u8,
    disk_len: usize,
    geo: Geometry,
}

// SAFETY: the image is immutable for the life of the kernel and the volume
// is only touched with IRQs masked.
unsafe impl Send for Fat16Volume {}
unsafe impl Sync for Fat16Volume {}

impl Fat16Volume {
    /// Mount the volume found through the MBR of the image at `disk`.
    ///
    /// Panics if the BPB boot signature is invalid; a corrupt disk is not a
    /// recoverable condition at boot.
    ///
    /// # Safety
    /// `disk..disk+len` must be a readable, immutable disk image.
    pub unsafe fn mount(disk: *const u8, len: usize) -> Self {
        // SAFETY: per the function contract.
        let image = unsafe { core::slice::from_raw_parts(disk, len) };

        let entry = MBR_PARTITION_OFFSET + PARTITION_LBA_OFFSET;
        let lba = u32::from_le_bytes([
            image[entry],
            image[entry + 1],
            image[entry + 2],
            image[entry + 3],
        ]) as usize;
        let geo = Geometry::parse(image, lba * BYTES_PER_SECTOR);

        log::info!(
            "fat: mounted, {} root entries, {} byte clusters",
            geo.root_entry_count,
            geo.bytes_per_cluster
        );
        Self {
            disk,
            disk_len: len,
            geo,
        }
    }

    fn image(&self) -> &[u8] {
        // SAFETY: mount's contract covers the whole image for our lifetime.
        unsafe { core::slice::from_raw_parts(self.disk, self.disk_len) }
    }

    /// Decode the root-directory entry at `dir_index`, if it names a file.
    pub fn dir_entry(&self, dir_index: usize) -> Option<DirEntryInfo> {
        if dir_index >= self.geo.root_entry_count {
            return None;
        }
        let off = self.geo.root_dir_offset + dir_index * DIR_ENTRY_SIZE;
        let raw = &self.image()[off..off + DIR_ENTRY_SIZE];
        if raw[0] == ENTRY_EMPTY || raw[0] == ENTRY_DELETED || raw[11] == ATTR_INVALID_FILE {
            return None;
        }
        Some(DirEntryInfo::decode(dir_index, raw))
    }

    /// Linear scan of the root directory for an 8.3 name. Returns the
    /// directory-entry index.
    pub fn search_file(&self, name: &[u8; 8], ext: &[u8; 3]) -> Option<usize> {
        (0..self.geo.root_entry_count).find(|&i| {
            self.dir_entry(i)
                .is_some_and(|e| e.name == *name && e.ext == *ext)
        })
    }

    /// Resolve a path to its directory entry.
    pub fn lookup(&self, path: &str) -> KernelResult<DirEntryInfo> {
        let (name, ext) = split_path(path)?;
        let dir_index = self
            .search_file(&name, &ext)
            .ok_or(KernelError::NotFound { resource: "file" })?;
        Ok(self.dir_entry(dir_index).expect("fat: entry vanished"))
    }

    /// Next cluster in the chain after `cluster`.
    fn fat_entry(&self, cluster: u16) -> u16 {
        let off = self.geo.fat_offset + cluster as usize * 2;
        let image = self.image();
        u16::from_le_bytes([image[off], image[off + 1]])
    }

    /// Follow the chain from `first_cluster`, copying data into `buf` until
    /// it is full or the chain ends. Returns the number of bytes copied.
    pub fn read_file(&self, first_cluster: u16, buf: &mut [u8]) -> usize {
        let mut cluster = first_cluster;
        let mut copied = 0;
        // The first two FAT entries are reserved; a chain through them is
        // as final as the end-of-data marker.
        while copied < buf.len() && (2..END_OF_DATA).contains(&cluster) {
            let off = self.geo.data_offset + (cluster as usize - 2) * self.geo.bytes_per_cluster;
            let take = self.geo.bytes_per_cluster.min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&self.image()[off..off + take]);
            copied += take;
            cluster = self.fat_entry(cluster);
        }
        copied
    }

    /// Iterate the live entries of the root directory.
    pub fn root_entries(&self) -> impl Iterator<Item = DirEntryInfo> + '_ {
        (0..self.geo.root_entry_count).filter_map(|i| self.dir_entry(i))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
