use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, PAGE_SIZE, PAGE_TYPE_LEAF, PAGE_TYPE_TABLE_HEADER};

/// `Pager` performs fixed-size block I/O against a single backing file.
///
/// Page 0 is always the table header; on a freshly created file the
/// pager also writes an empty leaf at page 1 and points the header's
/// `root_page_id` at it, so a `Table` opened on a brand-new file always
/// finds a valid (empty) tree.
pub struct Pager {
    file: Mutex<File>,
    num_pages: AtomicU32,
}

impl Pager {
    /// Opens `path`, creating it (with the initial header + root leaf)
    /// if it does not already exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let existed = path.as_ref().exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let pager = Self {
            file: Mutex::new(file),
            num_pages: AtomicU32::new(num_pages),
        };

        if !existed || num_pages == 0 {
            pager.init_fresh_file()?;
        }

        Ok(pager)
    }

    fn init_fresh_file(&self) -> Result<()> {
        self.num_pages.store(0, Ordering::SeqCst);

        let header_id = self.allocate_page_id();
        debug_assert_eq!(header_id, PageId::new(0));
        let root_id = self.allocate_page_id();
        debug_assert_eq!(root_id, PageId::new(1));

        let mut header = [0u8; PAGE_SIZE];
        header[0..2].copy_from_slice(&PAGE_TYPE_TABLE_HEADER.to_le_bytes());
        header[2..6].copy_from_slice(&root_id.as_u32().to_le_bytes());
        self.write_page(header_id, &header)?;

        let mut leaf = [0u8; PAGE_SIZE];
        leaf[0..2].copy_from_slice(&PAGE_TYPE_LEAF.to_le_bytes());
        // num_tuples = 0 (offset 2..6, already zero)
        leaf[6..10].copy_from_slice(&(-1i32).to_le_bytes()); // prev_leaf_id
        leaf[10..14].copy_from_slice(&(-1i32).to_le_bytes()); // next_leaf_id
        self.write_page(root_id, &leaf)?;

        Ok(())
    }

    /// Reads exactly `PAGE_SIZE` bytes for `page_id` into `buf`. A short
    /// read (end of file) is tolerated; the remainder of `buf` is zeroed.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let offset = (page_id.as_u32() as u64) * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        loop {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => return Err(e.into()),
            }
        }
        if total < PAGE_SIZE {
            buf[total..].fill(0);
        }
        Ok(())
    }

    /// Writes exactly `PAGE_SIZE` bytes for `page_id` and flushes.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = (page_id.as_u32() as u64) * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Atomically allocates and returns the next page id.
    pub fn allocate_page_id(&self) -> PageId {
        let id = self.num_pages.fetch_add(1, Ordering::SeqCst);
        PageId::new(id as i32)
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    /// Flushes and releases the underlying file handle.
    pub fn close(self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn open_creates_header_and_root_leaf() {
        let temp = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp.path()).unwrap();
        assert_eq!(pager.num_pages(), 2);

        let mut header = [0u8; PAGE_SIZE];
        pager.read_page(PageId::new(0), &mut header).unwrap();
        assert_eq!(u16::from_le_bytes([header[0], header[1]]), PAGE_TYPE_TABLE_HEADER);
        assert_eq!(u32::from_le_bytes(header[2..6].try_into().unwrap()), 1);

        let mut leaf = [0u8; PAGE_SIZE];
        pager.read_page(PageId::new(1), &mut leaf).unwrap();
        assert_eq!(u16::from_le_bytes([leaf[0], leaf[1]]), PAGE_TYPE_LEAF);
        assert_eq!(i32::from_le_bytes(leaf[6..10].try_into().unwrap()), -1);
        assert_eq!(i32::from_le_bytes(leaf[10..14].try_into().unwrap()), -1);
    }

    #[test]
    fn read_write_round_trip() {
        let temp = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp.path()).unwrap();

        let page_id = pager.allocate_page_id();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 7;
        pager.write_page(page_id, &data).unwrap();

        let mut read = [0u8; PAGE_SIZE];
        pager.read_page(page_id, &mut read).unwrap();
        assert_eq!(read[0], 42);
        assert_eq!(read[PAGE_SIZE - 1], 7);
    }

    #[test]
    fn reopen_preserves_pages() {
        let temp = NamedTempFile::new().unwrap();
        {
            let pager = Pager::open(temp.path()).unwrap();
            let page_id = pager.allocate_page_id();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 99;
            pager.write_page(page_id, &data).unwrap();
            pager.close().unwrap();
        }

        let pager = Pager::open(temp.path()).unwrap();
        assert_eq!(pager.num_pages(), 3);
        let mut data = [0u8; PAGE_SIZE];
        pager.read_page(PageId::new(2), &mut data).unwrap();
        assert_eq!(data[0], 99);
    }

    #[test]
    fn short_read_past_eof_is_zero_filled() {
        let temp = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp.path()).unwrap();

        // num_pages() tracks allocations, not file extent; reading an
        // allocated-but-never-written page must not error.
        let page_id = pager.allocate_page_id();
        let mut data = [1u8; PAGE_SIZE];
        pager.read_page(page_id, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }
}
