use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{OxbowError, PageId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};

/// DiskManager reads and writes fixed-size pages of a single database file.
///
/// Page ids map linearly to file offsets. Ids are handed out monotonically;
/// explicitly deallocated ids go on a free list and are reused before the
/// file grows. Page 0 is reserved at file creation for the header page that
/// records index roots.
pub struct DiskManager {
    /// File handle; the mutex serializes the seek-then-read/write pairs
    file: Mutex<File>,
    db_path: PathBuf,
    /// Next page id to hand out when the free list is empty
    next_page_id: AtomicU32,
    /// Deallocated page ids available for reuse
    free_pages: Mutex<Vec<PageId>>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at `db_path`. A freshly created
    /// file gets its header page written before any id is handed out.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        let dm = Self {
            file: Mutex::new(file),
            db_path,
            next_page_id: AtomicU32::new(num_pages.max(1)),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        if num_pages == 0 {
            dm.write_page(HEADER_PAGE_ID, &[0u8; PAGE_SIZE])?;
        }

        Ok(dm)
    }

    /// Reads a page from disk into the provided buffer. Reads past the end
    /// of the file zero-fill the remainder.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(page_id)))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(page_id)))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page id, reusing a deallocated id when one is available,
    /// and zeroes the page on disk.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = match self.free_pages.lock().pop() {
            Some(page_id) => page_id,
            None => PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst)),
        };
        self.write_page(page_id, &[0u8; PAGE_SIZE])?;
        Ok(page_id)
    }

    /// Releases a page id for reuse. The file is not shrunk.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id != INVALID_PAGE_ID && page_id != HEADER_PAGE_ID {
            self.free_pages.lock().push(page_id);
        }
        Ok(())
    }

    /// Returns the number of pages the file has grown to.
    pub fn num_pages(&self) -> u32 {
        self.next_page_id.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Forces file contents and metadata to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn offset(page_id: PageId) -> u64 {
        page_id.as_u32() as u64 * PAGE_SIZE as u64
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_reserves_header_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("test.db")).unwrap();

        assert_eq!(dm.num_pages(), 1);
        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(1));
    }

    #[test]
    fn test_read_write_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("rw.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &data).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut out).unwrap();
        assert_eq!(out[0], 42);
        assert_eq!(out[PAGE_SIZE - 1], 128);
        assert!(dm.num_reads() >= 1);
        assert!(dm.num_writes() >= 2);
    }

    #[test]
    fn test_read_past_end_zero_fills() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("short.db")).unwrap();

        let mut out = [7u8; PAGE_SIZE];
        dm.read_page(PageId::new(42), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deallocated_page_is_reused() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("realloc.db")).unwrap();

        let first = dm.allocate_page().unwrap();
        let second = dm.allocate_page().unwrap();
        assert_ne!(first, second);

        dm.deallocate_page(first).unwrap();
        assert_eq!(dm.allocate_page().unwrap(), first);
    }

    #[test]
    fn test_allocate_zeroes_reused_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("zero.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();
        dm.write_page(page_id, &[9u8; PAGE_SIZE]).unwrap();
        dm.deallocate_page(page_id).unwrap();

        let reused = dm.allocate_page().unwrap();
        assert_eq!(reused, page_id);
        let mut out = [1u8; PAGE_SIZE];
        dm.read_page(reused, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        let page_id = {
            let dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
            page_id
        };

        let dm = DiskManager::new(&db_path).unwrap();
        assert_eq!(dm.num_pages(), 2);
        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut out).unwrap();
        assert_eq!(out[0], 123);
    }
}
