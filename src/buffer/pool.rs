use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, StorageError, PAGE_SIZE};
use crate::storage::Pager;

use super::frame::FrameHeader;
use super::replacer::{LruReplacer, Replacer};

/// Fixed-capacity cache of page frames, with pinning and pluggable
/// eviction. Thread-safe: the page table, free list, and per-frame
/// metadata are all guarded so `fetch_page`/`unpin_page` may be called
/// concurrently from multiple transactions.
pub struct BufferPool {
    pager: Arc<Pager>,
    max_frames: usize,
    frames: Mutex<Vec<Arc<FrameHeader>>>,
    page_table: Mutex<HashMap<PageId, FrameId>>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: Box<dyn Replacer>,
}

impl BufferPool {
    pub fn new(initial_frames: usize, max_frames: usize, pager: Arc<Pager>) -> Self {
        Self::with_replacer(initial_frames, max_frames, pager, Box::new(LruReplacer::new()))
    }

    pub fn with_replacer(
        initial_frames: usize,
        max_frames: usize,
        pager: Arc<Pager>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        let initial_frames = initial_frames.min(max_frames);
        let mut frames = Vec::with_capacity(initial_frames);
        let mut free_list = VecDeque::with_capacity(initial_frames);
        for i in 0..initial_frames {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pager,
            max_frames,
            frames: Mutex::new(frames),
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer,
        }
    }

    /// Fetches `page_id` into a pinned frame, reading from disk on a
    /// cache miss. Every call must be balanced by `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        {
            let page_table = self.page_table.lock();
            if let Some(&frame_id) = page_table.get(&page_id) {
                let frame = self.frame(frame_id);
                frame.pin();
                self.replacer.erase(page_id);
                return Ok(frame);
            }
        }

        let frame_id = self.acquire_frame()?;
        let frame = self.frame(frame_id);

        let mut data = [0u8; PAGE_SIZE];
        self.pager.read_page(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.clear_dirty();
        frame.pin();

        self.page_table.lock().insert(page_id, frame_id);
        self.replacer.erase(page_id);

        Ok(frame)
    }

    /// ORs `mark_dirty` into the frame's dirty bit and decrements the
    /// pin count; when it reaches zero, the page becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, mark_dirty: bool) -> Result<()> {
        let frame_id = {
            let page_table = self.page_table.lock();
            *page_table.get(&page_id).ok_or(StorageError::PageNotFound(page_id))?
        };
        let frame = self.frame(frame_id);

        frame.mark_dirty(mark_dirty);
        if let Some(0) = frame.unpin() {
            self.replacer.insert(page_id);
        }
        Ok(())
    }

    /// Allocates a new page (via the pager) and returns it pinned and
    /// zeroed. Caller must `unpin_page` exactly once to release it.
    pub fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        let frame_id = self.acquire_frame()?;
        let page_id = self.pager.allocate_page_id();
        let frame = self.frame(frame_id);

        frame.reset();
        frame.set_page_id(page_id);
        frame.pin();

        self.page_table.lock().insert(page_id, frame_id);
        Ok((page_id, frame))
    }

    /// Writes a single dirty frame's bytes back through the pager.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let page_table = self.page_table.lock();
            match page_table.get(&page_id) {
                Some(&fid) => fid,
                None => return Ok(()),
            }
        };
        let frame = self.frame(frame_id);
        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.pager.write_page(page_id, &data)?;
        frame.clear_dirty();
        Ok(())
    }

    /// Flushes every dirty frame currently resident in the pool.
    pub fn flush_all(&self) -> Result<()> {
        let dirty: Vec<PageId> = {
            let page_table = self.page_table.lock();
            page_table
                .iter()
                .filter(|(_, &fid)| self.frame(fid).is_dirty())
                .map(|(&pid, _)| pid)
                .collect()
        };
        for page_id in dirty {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let page_table = self.page_table.lock();
        page_table.get(&page_id).map(|&fid| self.frame(fid).pin_count())
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    fn frame(&self, frame_id: FrameId) -> Arc<FrameHeader> {
        Arc::clone(&self.frames.lock()[frame_id.as_usize()])
    }

    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        {
            let mut frames = self.frames.lock();
            if frames.len() < self.max_frames {
                let frame_id = FrameId::new(frames.len() as u32);
                frames.push(Arc::new(FrameHeader::new(frame_id)));
                return Ok(frame_id);
            }
        }

        let victim_page = self.replacer.victim().ok_or(StorageError::NoVictim)?;
        let frame_id = {
            let page_table = self.page_table.lock();
            *page_table
                .get(&victim_page)
                .expect("replacer victim must be in the page table")
        };
        let frame = self.frame(frame_id);

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.pager.write_page(victim_page, &data)?;
        }

        self.page_table.lock().remove(&victim_page);
        frame.reset();
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn new_pool(initial: usize, max: usize) -> (BufferPool, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let pager = Arc::new(Pager::open(temp.path()).unwrap());
        (BufferPool::new(initial, max, pager), temp)
    }

    #[test]
    fn fetch_then_unpin_zeroes_pin_count() {
        let (pool, _temp) = new_pool(4, 4);
        let frame = pool.fetch_page(PageId::new(0)).unwrap();
        assert_eq!(frame.pin_count(), 1);
        pool.unpin_page(PageId::new(0), false).unwrap();
        assert_eq!(pool.pin_count(PageId::new(0)), Some(0));
    }

    #[test]
    fn eviction_with_single_frame() {
        let (pool, _temp) = new_pool(1, 1);
        pool.fetch_page(PageId::new(0)).unwrap();
        pool.unpin_page(PageId::new(0), false).unwrap();

        let frame = pool.fetch_page(PageId::new(1)).unwrap();
        assert_eq!(frame.page_id(), PageId::new(1));
        assert_eq!(pool.pin_count(PageId::new(0)), None);
    }

    #[test]
    fn buffer_pool_full_when_all_pinned() {
        let (pool, _temp) = new_pool(1, 1);
        let _frame = pool.fetch_page(PageId::new(0)).unwrap();
        let err = pool.fetch_page(PageId::new(1)).unwrap_err();
        assert!(matches!(err, StorageError::NoVictim));
    }

    #[test]
    fn dirty_victim_is_flushed_before_eviction() {
        let (pool, temp) = new_pool(1, 1);
        {
            let (page_id, frame) = pool.new_page().unwrap();
            frame.copy_from(&{
                let mut d = [0u8; PAGE_SIZE];
                d[0] = 77;
                d
            });
            pool.unpin_page(page_id, true).unwrap();
        }

        // Force eviction of the dirty page by fetching something else.
        pool.fetch_page(PageId::new(0)).unwrap();

        drop(pool);
        let pager = Arc::new(Pager::open(temp.path()).unwrap());
        let mut data = [0u8; PAGE_SIZE];
        pager.read_page(PageId::new(2), &mut data).unwrap();
        assert_eq!(data[0], 77);
    }

    #[test]
    fn commit_then_fresh_fetch_sees_flushed_bytes() {
        let (pool, temp) = new_pool(4, 4);
        let page_id = PageId::new(1);
        {
            let frame = pool.fetch_page(page_id).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            data[0] = 100;
            frame.copy_from(&data);
            pool.unpin_page(page_id, true).unwrap();
        }
        pool.flush_page(page_id).unwrap();
        drop(pool);

        let pager = Arc::new(Pager::open(temp.path()).unwrap());
        let pool2 = BufferPool::new(4, 4, pager);
        let frame = pool2.fetch_page(page_id).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        assert_eq!(data[0], 100);
    }
}
