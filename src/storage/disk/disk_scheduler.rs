use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{OxbowError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A single disk I/O request handed to the worker thread.
pub struct DiskRequest {
    /// Whether this is a write (true) or read (false) request
    pub is_write: bool,
    /// The page to read or write
    pub page_id: PageId,
    /// Pointer to a PAGE_SIZE buffer: filled for reads, drained for writes
    pub data: *mut u8,
    /// Completion signal carrying the outcome
    pub callback: Option<std::sync::mpsc::Sender<bool>>,
}

// Safety: the request is consumed by the single worker thread and the
// issuing thread blocks until the callback fires, keeping the buffer valid.
unsafe impl Send for DiskRequest {}

impl DiskRequest {
    pub fn read(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: false,
            page_id,
            data,
            callback: None,
        }
    }

    pub fn write(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: true,
            page_id,
            data,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: std::sync::mpsc::Sender<bool>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// DiskScheduler funnels page I/O through a background worker thread fed by
/// a bounded channel. The buffer pool uses the synchronous entry points,
/// which block until the worker signals completion.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a scheduler over `disk_manager` and spawns its worker.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let shutdown_flag = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || {
            Self::run_worker(dm, receiver, shutdown_flag);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a request without waiting for it to complete.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| OxbowError::DiskScheduler(format!("failed to schedule request: {}", e)))
    }

    /// Reads `page_id` into `data`, blocking until the worker finishes.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        self.schedule(DiskRequest::read(page_id, data.as_mut_ptr()).with_callback(tx))?;

        let ok = rx
            .recv()
            .map_err(|e| OxbowError::DiskScheduler(format!("worker dropped request: {}", e)))?;
        if !ok {
            return Err(OxbowError::DiskScheduler(format!(
                "read of {} failed",
                page_id
            )));
        }
        Ok(())
    }

    /// Writes `data` to `page_id`, blocking until the worker finishes.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        // The worker only reads through the pointer for write requests.
        let request = DiskRequest::write(page_id, data.as_ptr() as *mut u8).with_callback(tx);
        self.schedule(request)?;

        let ok = rx
            .recv()
            .map_err(|e| OxbowError::DiskScheduler(format!("worker dropped request: {}", e)))?;
        if !ok {
            return Err(OxbowError::DiskScheduler(format!(
                "write of {} failed",
                page_id
            )));
        }
        Ok(())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain whatever is still queued before exiting.
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => Self::process_request(&disk_manager, request),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let success = if request.is_write {
            // Safety: the issuer keeps the buffer alive until the callback.
            let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
            disk_manager.write_page(request.page_id, data).is_ok()
        } else {
            // Safety: as above, and the issuer holds the only reference.
            let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
            disk_manager.read_page(request.page_id, data).is_ok()
        };

        if let Some(callback) = request.callback {
            let _ = callback.send(success);
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[100] = 255;
        scheduler.schedule_write_sync(page_id, &data).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        scheduler.schedule_read_sync(page_id, &mut out).unwrap();
        assert_eq!(out[0], 42);
        assert_eq!(out[100], 255);
    }

    #[test]
    fn test_scheduler_many_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let pages: Vec<_> = (0..8u8)
            .map(|i| {
                let page_id = scheduler.disk_manager().allocate_page().unwrap();
                scheduler
                    .schedule_write_sync(page_id, &[i; PAGE_SIZE])
                    .unwrap();
                (page_id, i)
            })
            .collect();

        for (page_id, fill) in pages {
            let mut out = [0u8; PAGE_SIZE];
            scheduler.schedule_read_sync(page_id, &mut out).unwrap();
            assert_eq!(out[0], fill);
            assert_eq!(out[PAGE_SIZE - 1], fill);
        }
    }
}
