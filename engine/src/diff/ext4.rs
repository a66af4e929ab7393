//! Minimal read-only ext4 walker, sufficient to enumerate the file table
//! of a container rootfs image: directory tree, entry kind, size and
//! mtime. Writes never happen here; the guest owns the filesystem.

use std::{
    collections::HashSet,
    fs::File,
    os::unix::fs::FileExt,
    path::Path,
};

use snafu::ResultExt;

use super::{BaselineEntry, DiffError, FileKind, Io, Result};

const SUPERBLOCK_OFFSET: u64 = 1024;
const SUPERBLOCK_SIZE: usize = 1024;
const EXT4_MAGIC: u16 = 0xEF53;
const ROOT_INODE: u64 = 2;

const INCOMPAT_FILETYPE: u32 = 0x2;
const INCOMPAT_META_BG: u32 = 0x10;
const INCOMPAT_EXTENTS: u32 = 0x40;
const INCOMPAT_64BIT: u32 = 0x80;
const INCOMPAT_INLINE_DATA: u32 = 0x8000;
const INCOMPAT_ENCRYPT: u32 = 0x10000;

const EXTENTS_FL: u32 = 0x80000;
const EXTENT_MAGIC: u16 = 0xF30A;

fn u16_le(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[derive(Debug, Clone)]
struct Inode {
    mode: u16,
    size: u64,
    mtime: u32,
    flags: u32,
    block: [u8; 60],
}

impl Inode {
    fn is_dir(&self) -> bool {
        self.mode & 0xF000 == 0x4000
    }

    fn kind(&self) -> FileKind {
        match self.mode & 0xF000 {
            0x1000 => FileKind::Fifo,
            0x2000 => FileKind::CharDevice,
            0x4000 => FileKind::Directory,
            0x6000 => FileKind::BlockDevice,
            0x8000 => FileKind::Regular,
            0xA000 => FileKind::Symlink,
            0xC000 => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }
}

/// Open rootfs image, positioned reads only.
#[derive(Debug)]
pub struct Ext4Walker {
    file: File,
    block_size: u64,
    inodes_per_group: u64,
    inode_size: u64,
    incompat: u32,
    /// Inode table start block, per group.
    inode_tables: Vec<u64>,
}

impl Ext4Walker {
    pub fn open(path: &Path) -> Result<Ext4Walker> {
        let file = File::open(path).context(Io)?;
        let mut sb = [0u8; SUPERBLOCK_SIZE];
        file.read_exact_at(&mut sb, SUPERBLOCK_OFFSET).context(Io)?;

        if u16_le(&sb, 0x38) != EXT4_MAGIC {
            return Err(DiffError::NotExt4 {
                path: path.display().to_string(),
            });
        }

        let incompat = u32_le(&sb, 0x60);
        if incompat & INCOMPAT_META_BG != 0 {
            return Err(DiffError::Unsupported {
                feature: "meta block groups".to_string(),
            });
        }
        if incompat & INCOMPAT_INLINE_DATA != 0 {
            return Err(DiffError::Unsupported {
                feature: "inline data".to_string(),
            });
        }
        if incompat & INCOMPAT_ENCRYPT != 0 {
            return Err(DiffError::Unsupported {
                feature: "fscrypt".to_string(),
            });
        }

        let block_size = 1024u64 << u32_le(&sb, 0x18);
        let inodes_count = u32_le(&sb, 0x0) as u64;
        let inodes_per_group = u32_le(&sb, 0x28) as u64;
        if inodes_per_group == 0 {
            return Err(DiffError::Corrupt {
                what: "zero inodes per group".to_string(),
            });
        }
        let rev_level = u32_le(&sb, 0x4C);
        let inode_size = if rev_level >= 1 {
            u16_le(&sb, 0x58) as u64
        } else {
            128
        };
        if inode_size < 128 {
            return Err(DiffError::Corrupt {
                what: format!("inode size {inode_size}"),
            });
        }
        let first_data_block = u32_le(&sb, 0x14) as u64;
        let desc_size = if incompat & INCOMPAT_64BIT != 0 {
            let sz = u16_le(&sb, 0xFE) as u64;
            if sz < 32 {
                32
            } else {
                sz
            }
        } else {
            32
        };

        let group_count = inodes_count.div_ceil(inodes_per_group);
        let gd_offset = (first_data_block + 1) * block_size;
        let mut inode_tables = Vec::with_capacity(group_count as usize);
        let mut desc = vec![0u8; desc_size as usize];
        for g in 0 .. group_count {
            file.read_exact_at(&mut desc, gd_offset + g * desc_size)
                .context(Io)?;
            let lo = u32_le(&desc, 0x8) as u64;
            let hi = if desc_size >= 64 {
                u32_le(&desc, 0x28) as u64
            } else {
                0
            };
            inode_tables.push(lo | (hi << 32));
        }

        Ok(Ext4Walker {
            file,
            block_size,
            inodes_per_group,
            inode_size,
            incompat,
            inode_tables,
        })
    }

    /// Enumerate every entry of the filesystem except the root itself.
    pub fn walk(&mut self) -> Result<Vec<BaselineEntry>> {
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(ROOT_INODE);
        let root = self.read_inode(ROOT_INODE)?;
        self.walk_dir(&root, "", &mut visited, &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size as usize];
        self.file
            .read_exact_at(&mut buf, block * self.block_size)
            .context(Io)?;
        Ok(buf)
    }

    fn read_inode(&self, ino: u64) -> Result<Inode> {
        let group = (ino - 1) / self.inodes_per_group;
        let index = (ino - 1) % self.inodes_per_group;
        let table =
            self.inode_tables.get(group as usize).ok_or_else(|| {
                DiffError::Corrupt {
                    what: format!("inode {ino} outside any group"),
                }
            })?;
        let pos = table * self.block_size + index * self.inode_size;
        let mut raw = vec![0u8; self.inode_size as usize];
        self.file.read_exact_at(&mut raw, pos).context(Io)?;

        let mode = u16_le(&raw, 0);
        let size_lo = u32_le(&raw, 0x4) as u64;
        let size_high = if mode & 0xF000 == 0x8000 {
            u32_le(&raw, 0x6C) as u64
        } else {
            0
        };
        let mut block = [0u8; 60];
        block.copy_from_slice(&raw[0x28 .. 0x28 + 60]);
        Ok(Inode {
            mode,
            size: size_lo | (size_high << 32),
            mtime: u32_le(&raw, 0x10),
            flags: u32_le(&raw, 0x20),
            block,
        })
    }

    /// Physical blocks of a directory, logical order.
    fn dir_blocks(&self, inode: &Inode) -> Result<Vec<u64>> {
        if inode.flags & EXTENTS_FL != 0 {
            let mut extents = Vec::new();
            self.collect_extents(&inode.block, &mut extents, 0)?;
            extents.sort_by_key(|(logical, _, _)| *logical);
            let mut blocks = Vec::new();
            for (_, start, len) in extents {
                for i in 0 .. len {
                    blocks.push(start + i);
                }
            }
            Ok(blocks)
        } else {
            let limit = inode.size.div_ceil(self.block_size);
            let mut blocks = Vec::new();
            self.collect_classic(&inode.block, limit, &mut blocks)?;
            Ok(blocks)
        }
    }

    fn collect_extents(
        &self,
        node: &[u8],
        out: &mut Vec<(u64, u64, u64)>,
        depth_guard: u32,
    ) -> Result<()> {
        if depth_guard > 8 {
            return Err(DiffError::Corrupt {
                what: "extent tree too deep".to_string(),
            });
        }
        if u16_le(node, 0) != EXTENT_MAGIC {
            return Err(DiffError::Corrupt {
                what: "bad extent header magic".to_string(),
            });
        }
        let entry_count = u16_le(node, 2) as usize;
        let depth = u16_le(node, 6);
        let max_entries = (node.len() - 12) / 12;
        if entry_count > max_entries {
            return Err(DiffError::Corrupt {
                what: "extent entry count exceeds node".to_string(),
            });
        }
        for i in 0 .. entry_count {
            let off = 12 + i * 12;
            if depth == 0 {
                let logical = u32_le(node, off) as u64;
                let raw_len = u16_le(node, off + 4) as u64;
                // lengths above 32768 mark unwritten extents
                let len = if raw_len > 32768 {
                    raw_len - 32768
                } else {
                    raw_len
                };
                let start_hi = u16_le(node, off + 6) as u64;
                let start_lo = u32_le(node, off + 8) as u64;
                out.push((logical, start_lo | (start_hi << 32), len));
            } else {
                let leaf_lo = u32_le(node, off + 4) as u64;
                let leaf_hi = u16_le(node, off + 8) as u64;
                let child = self.read_block(leaf_lo | (leaf_hi << 32))?;
                self.collect_extents(&child, out, depth_guard + 1)?;
            }
        }
        Ok(())
    }

    /// Classic (pre-extent) block map: 12 direct pointers, then single,
    /// double and triple indirection.
    fn collect_classic(
        &self,
        i_block: &[u8],
        limit: u64,
        out: &mut Vec<u64>,
    ) -> Result<()> {
        for i in 0 .. 12 {
            if out.len() as u64 >= limit {
                return Ok(());
            }
            let b = u32_le(i_block, i * 4) as u64;
            if b != 0 {
                out.push(b);
            }
        }
        for (slot, level) in [(12usize, 1u32), (13, 2), (14, 3)] {
            if out.len() as u64 >= limit {
                return Ok(());
            }
            let b = u32_le(i_block, slot * 4) as u64;
            if b != 0 {
                self.collect_indirect(b, level, limit, out)?;
            }
        }
        Ok(())
    }

    fn collect_indirect(
        &self,
        block: u64,
        level: u32,
        limit: u64,
        out: &mut Vec<u64>,
    ) -> Result<()> {
        let data = self.read_block(block)?;
        for off in (0 .. data.len()).step_by(4) {
            if out.len() as u64 >= limit {
                return Ok(());
            }
            let b = u32_le(&data, off) as u64;
            if b == 0 {
                continue;
            }
            if level == 1 {
                out.push(b);
            } else {
                self.collect_indirect(b, level - 1, limit, out)?;
            }
        }
        Ok(())
    }

    fn walk_dir(
        &self,
        dir: &Inode,
        prefix: &str,
        visited: &mut HashSet<u64>,
        entries: &mut Vec<BaselineEntry>,
    ) -> Result<()> {
        for block in self.dir_blocks(dir)? {
            let data = self.read_block(block)?;
            let mut off = 0usize;
            while off + 8 <= data.len() {
                let ino = u32_le(&data, off) as u64;
                let rec_len = u16_le(&data, off + 4) as usize;
                if rec_len < 8 || off + rec_len > data.len() {
                    break;
                }
                let name_len = data[off + 6] as usize;
                let file_type = data[off + 7];
                if ino != 0 && name_len > 0 && off + 8 + name_len <= data.len()
                {
                    let name = String::from_utf8_lossy(
                        &data[off + 8 .. off + 8 + name_len],
                    )
                    .to_string();
                    if name != "." && name != ".." {
                        self.visit(
                            ino, file_type, &name, prefix, visited, entries,
                        )?;
                    }
                }
                off += rec_len;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        ino: u64,
        dirent_type: u8,
        name: &str,
        prefix: &str,
        visited: &mut HashSet<u64>,
        entries: &mut Vec<BaselineEntry>,
    ) -> Result<()> {
        let inode = self.read_inode(ino)?;
        let kind = if self.incompat & INCOMPAT_FILETYPE != 0 {
            match dirent_type {
                1 => FileKind::Regular,
                2 => FileKind::Directory,
                3 => FileKind::CharDevice,
                4 => FileKind::BlockDevice,
                5 => FileKind::Fifo,
                6 => FileKind::Socket,
                7 => FileKind::Symlink,
                _ => inode.kind(),
            }
        } else {
            inode.kind()
        };
        let path = format!("{prefix}/{name}");
        entries.push(BaselineEntry {
            path: path.clone(),
            kind,
            size: inode.size,
            mtime: inode.mtime as i64,
        });
        if inode.is_dir() && visited.insert(ino) {
            self.walk_dir(&inode, &path, visited, entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const BS: usize = 1024;

    fn put_u16(img: &mut [u8], off: usize, v: u16) {
        img[off .. off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(img: &mut [u8], off: usize, v: u32) {
        img[off .. off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn dirent(
        img: &mut [u8],
        off: usize,
        ino: u32,
        rec_len: u16,
        file_type: u8,
        name: &str,
    ) {
        put_u32(img, off, ino);
        put_u16(img, off + 4, rec_len);
        img[off + 6] = name.len() as u8;
        img[off + 7] = file_type;
        img[off + 8 .. off + 8 + name.len()]
            .copy_from_slice(name.as_bytes());
    }

    /// Build a tiny valid image: 1K blocks, one group, a root directory
    /// holding a single regular file.
    fn build_image(extent_root: bool) -> Vec<u8> {
        let mut img = vec![0u8; 64 * BS];
        let sb = 1024;
        put_u32(&mut img, sb, 16); // inodes count
        put_u32(&mut img, sb + 0x4, 64); // blocks count
        put_u32(&mut img, sb + 0x14, 1); // first data block
        put_u32(&mut img, sb + 0x18, 0); // log block size -> 1024
        put_u32(&mut img, sb + 0x20, 8192); // blocks per group
        put_u32(&mut img, sb + 0x28, 16); // inodes per group
        put_u16(&mut img, sb + 0x38, 0xEF53); // magic
        put_u32(&mut img, sb + 0x4C, 0); // rev level -> 128b inodes
        put_u32(
            &mut img,
            sb + 0x60,
            super::INCOMPAT_FILETYPE
                | if extent_root {
                    super::INCOMPAT_EXTENTS
                } else {
                    0
                },
        );

        // group descriptor at block 2: inode table starts at block 5
        put_u32(&mut img, 2 * BS + 0x8, 5);

        // root inode (#2)
        let root = 5 * BS + 128;
        put_u16(&mut img, root, 0x41ED); // drwxr-xr-x
        put_u32(&mut img, root + 0x4, BS as u32); // size
        put_u32(&mut img, root + 0x10, 1_000); // mtime
        if extent_root {
            put_u32(&mut img, root + 0x20, super::EXTENTS_FL);
            let eh = root + 0x28;
            put_u16(&mut img, eh, 0xF30A); // magic
            put_u16(&mut img, eh + 2, 1); // entries
            put_u16(&mut img, eh + 4, 4); // max
            put_u16(&mut img, eh + 6, 0); // depth
            put_u32(&mut img, eh + 12, 0); // logical 0
            put_u16(&mut img, eh + 16, 1); // length
            put_u16(&mut img, eh + 18, 0); // start hi
            put_u32(&mut img, eh + 20, 10); // start lo
        } else {
            put_u32(&mut img, root + 0x28, 10); // direct block 0
        }

        // file inode (#12)
        let file = 5 * BS + 11 * 128;
        put_u16(&mut img, file, 0x81A4); // -rw-r--r--
        put_u32(&mut img, file + 0x4, 5); // size
        put_u32(&mut img, file + 0x10, 1_234); // mtime

        // root directory data in block 10
        let d = 10 * BS;
        dirent(&mut img, d, 2, 12, 2, ".");
        dirent(&mut img, d + 12, 2, 12, 2, "..");
        dirent(&mut img, d + 24, 12, (BS - 24) as u16, 1, "hello.txt");

        img
    }

    fn write_image(img: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(img).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn walks_a_classic_block_map_root() {
        let f = write_image(&build_image(false));
        let mut walker = Ext4Walker::open(f.path()).unwrap();
        let entries = walker.walk().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/hello.txt");
        assert_eq!(entries[0].kind, FileKind::Regular);
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[0].mtime, 1_234);
    }

    #[test]
    fn walks_an_extent_mapped_root() {
        let f = write_image(&build_image(true));
        let mut walker = Ext4Walker::open(f.path()).unwrap();
        let entries = walker.walk().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/hello.txt");
    }

    #[test]
    fn rejects_a_non_ext4_image() {
        let f = write_image(&vec![0u8; 4 * BS]);
        let err = Ext4Walker::open(f.path()).unwrap_err();
        assert!(matches!(err, DiffError::NotExt4 { .. }));
    }
}
