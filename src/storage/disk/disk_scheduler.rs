use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{CortenError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// One queued disk I/O request.
pub struct DiskRequest {
    /// Write when true, read otherwise
    pub is_write: bool,
    pub page_id: PageId,
    /// Page-sized buffer: written into for reads, read from for writes
    pub data: *mut u8,
    /// Completion signal carrying the outcome
    pub completion: Option<Sender<bool>>,
}

// Safety: the scheduling caller keeps the buffer alive and untouched until
// the completion signal fires; only the worker thread dereferences it.
unsafe impl Send for DiskRequest {}

impl DiskRequest {
    pub fn read(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: false,
            page_id,
            data,
            completion: None,
        }
    }

    pub fn write(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: true,
            page_id,
            data,
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Sender<bool>) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// DiskScheduler funnels page I/O through a background worker thread fed by
/// a bounded channel. The synchronous wrappers block until the worker
/// reports completion; shutdown drains whatever is still queued.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_tx: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (request_tx, request_rx) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_dm = Arc::clone(&disk_manager);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::spawn(move || {
            Self::run_worker(worker_dm, request_rx, worker_shutdown);
        });

        Self {
            disk_manager,
            request_tx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Queues a request for the worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|e| CortenError::DiskScheduler(format!("failed to queue request: {}", e)))
    }

    /// Reads `page_id` into `data`, blocking until the worker finishes.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::read(page_id, data.as_mut_ptr()).with_completion(tx))?;
        self.wait_for_completion(&rx, page_id)
    }

    /// Writes `data` to `page_id`, blocking until the worker finishes.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = bounded(1);
        // The worker only reads through the pointer for writes.
        let request = DiskRequest::write(page_id, data.as_ptr() as *mut u8).with_completion(tx);
        self.schedule(request)?;
        self.wait_for_completion(&rx, page_id)
    }

    fn wait_for_completion(&self, rx: &Receiver<bool>, page_id: PageId) -> Result<()> {
        match rx.recv() {
            Ok(true) => Ok(()),
            Ok(false) => Err(CortenError::DiskScheduler(format!(
                "I/O on {} failed",
                page_id
            ))),
            Err(e) => Err(CortenError::DiskScheduler(format!(
                "completion channel closed: {}",
                e
            ))),
        }
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        requests: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(request) = requests.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match requests.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        let ok = if request.is_write {
            // Safety: the scheduler contract keeps the buffer valid until
            // completion is signalled.
            let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
            disk_manager.write_page(request.page_id, data).is_ok()
        } else {
            let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
            disk_manager.read_page(request.page_id, data).is_ok()
        };

        if let Some(completion) = request.completion {
            let _ = completion.send(ok);
        }
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
