use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use crate::bitmap::{decode_bitmap, DecodedSlice};
use crate::history::HistoryRow;
use crate::service::{
    CompositeDownload, ExportOutcome, FolderKind, FolderSwitch, ImageService, RoiOverlay, RoiStats,
};
use crate::stats::StatsRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RenderSlice,
    RenderAllSlices,
    Filename,
    Metadata,
    RoiStats,
    FolderType,
    ListFolders,
    SwitchFolder,
    CurrentFolderName,
    ToneMatching,
    ExportHistory,
    DownloadComposite,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::RenderSlice => "render_slice",
            Operation::RenderAllSlices => "render_all_slices",
            Operation::Filename => "get_filename",
            Operation::Metadata => "get_metadata",
            Operation::RoiStats => "compute_roi_stats",
            Operation::FolderType => "get_folder_type",
            Operation::ListFolders => "list_folders",
            Operation::SwitchFolder => "switch_folder",
            Operation::CurrentFolderName => "get_current_folder_name",
            Operation::ToneMatching => "set_tone_matching",
            Operation::ExportHistory => "export_history",
            Operation::DownloadComposite => "download_composite",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRequest {
    RenderSlice {
        series: usize,
        slice: usize,
        generation: u64,
    },
    RenderAllSlices {
        slice: usize,
        generations: Vec<u64>,
    },
    Filename {
        series: usize,
        slice: usize,
        generation: u64,
    },
    Metadata {
        series: usize,
        slice: usize,
    },
    RoiStats(StatsRequest),
    FolderType {
        series: usize,
    },
    ListFolders {
        series: usize,
    },
    SwitchFolder {
        series: usize,
        folder_index: usize,
    },
    CurrentFolderName {
        series: usize,
    },
    ToneMatching {
        enabled: bool,
    },
    ExportHistory {
        rows: Vec<HistoryRow>,
    },
    DownloadComposite {
        rois: Option<Vec<Option<RoiOverlay>>>,
        slices: Vec<usize>,
    },
}

impl ServiceRequest {
    pub fn operation(&self) -> Operation {
        match self {
            ServiceRequest::RenderSlice { .. } => Operation::RenderSlice,
            ServiceRequest::RenderAllSlices { .. } => Operation::RenderAllSlices,
            ServiceRequest::Filename { .. } => Operation::Filename,
            ServiceRequest::Metadata { .. } => Operation::Metadata,
            ServiceRequest::RoiStats(_) => Operation::RoiStats,
            ServiceRequest::FolderType { .. } => Operation::FolderType,
            ServiceRequest::ListFolders { .. } => Operation::ListFolders,
            ServiceRequest::SwitchFolder { .. } => Operation::SwitchFolder,
            ServiceRequest::CurrentFolderName { .. } => Operation::CurrentFolderName,
            ServiceRequest::ToneMatching { .. } => Operation::ToneMatching,
            ServiceRequest::ExportHistory { .. } => Operation::ExportHistory,
            ServiceRequest::DownloadComposite { .. } => Operation::DownloadComposite,
        }
    }

    pub fn series(&self) -> Option<usize> {
        match self {
            ServiceRequest::RenderSlice { series, .. }
            | ServiceRequest::Filename { series, .. }
            | ServiceRequest::Metadata { series, .. }
            | ServiceRequest::FolderType { series }
            | ServiceRequest::ListFolders { series }
            | ServiceRequest::SwitchFolder { series, .. }
            | ServiceRequest::CurrentFolderName { series } => Some(*series),
            ServiceRequest::RoiStats(request) => Some(request.series),
            ServiceRequest::RenderAllSlices { .. }
            | ServiceRequest::ToneMatching { .. }
            | ServiceRequest::ExportHistory { .. }
            | ServiceRequest::DownloadComposite { .. } => None,
        }
    }

    /// Whether issuing `self` makes a still-queued `older` pointless. Holds
    /// only for requests whose completions are generation-checked, since the
    /// newer request bumped that generation.
    pub fn supersedes(&self, older: &ServiceRequest) -> bool {
        match (self, older) {
            (
                ServiceRequest::RenderAllSlices { .. },
                ServiceRequest::RenderAllSlices { .. } | ServiceRequest::RenderSlice { .. },
            ) => true,
            (
                ServiceRequest::RenderSlice { series, .. },
                ServiceRequest::RenderSlice { series: queued, .. },
            )
            | (
                ServiceRequest::Filename { series, .. },
                ServiceRequest::Filename { series: queued, .. },
            ) => series == queued,
            (ServiceRequest::RoiStats(newer), ServiceRequest::RoiStats(queued)) => {
                newer.series == queued.series
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ServiceResponse {
    Bitmap {
        series: usize,
        generation: u64,
        bitmap: Arc<DecodedSlice>,
    },
    Filename {
        series: usize,
        generation: u64,
        filename: String,
    },
    Metadata {
        series: usize,
        slice: usize,
        text: String,
    },
    RoiStats {
        request: StatsRequest,
        stats: RoiStats,
    },
    FolderType {
        series: usize,
        kind: FolderKind,
    },
    Folders {
        series: usize,
        folders: Vec<String>,
    },
    FolderSwitched {
        series: usize,
        outcome: FolderSwitch,
    },
    FolderName {
        series: usize,
        name: String,
    },
    ToneMatching {
        enabled: bool,
    },
    Exported(ExportOutcome),
    CompositeDownloaded(CompositeDownload),
    Failed {
        operation: Operation,
        series: Option<usize>,
        message: String,
    },
}

pub fn execute(service: &dyn ImageService, request: ServiceRequest) -> Vec<ServiceResponse> {
    let operation = request.operation();
    let series = request.series();
    log::debug!("{} (series {:?})", operation.name(), series);

    let result = match request {
        ServiceRequest::RenderAllSlices { slice, generations } => {
            return execute_render_all(service, slice, &generations);
        }
        ServiceRequest::RenderSlice {
            series,
            slice,
            generation,
        } => service
            .render_slice(series, slice)
            .and_then(|encoded| decode_bitmap(&encoded))
            .map(|bitmap| ServiceResponse::Bitmap {
                series,
                generation,
                bitmap: Arc::new(bitmap),
            }),
        ServiceRequest::Filename {
            series,
            slice,
            generation,
        } => service
            .filename(series, slice)
            .map(|filename| ServiceResponse::Filename {
                series,
                generation,
                filename,
            }),
        ServiceRequest::Metadata { series, slice } => service
            .metadata(series, slice)
            .map(|text| ServiceResponse::Metadata {
                series,
                slice,
                text,
            }),
        ServiceRequest::RoiStats(request) => service
            .compute_roi_stats(request.series, request.slice, request.roi, request.size)
            .map(|stats| ServiceResponse::RoiStats { request, stats }),
        ServiceRequest::FolderType { series } => service
            .folder_type(series)
            .map(|kind| ServiceResponse::FolderType { series, kind }),
        ServiceRequest::ListFolders { series } => service
            .list_folders(series)
            .map(|folders| ServiceResponse::Folders { series, folders }),
        ServiceRequest::SwitchFolder {
            series,
            folder_index,
        } => service
            .switch_folder(series, folder_index)
            .map(|outcome| ServiceResponse::FolderSwitched { series, outcome }),
        ServiceRequest::CurrentFolderName { series } => service
            .current_folder_name(series)
            .map(|name| ServiceResponse::FolderName { series, name }),
        ServiceRequest::ToneMatching { enabled } => service
            .set_tone_matching(enabled)
            .map(|()| ServiceResponse::ToneMatching { enabled }),
        ServiceRequest::ExportHistory { rows } => service
            .export_history(&rows)
            .map(ServiceResponse::Exported),
        ServiceRequest::DownloadComposite { rois, slices } => match rois {
            Some(rois) => service.download_composite_with_roi(&rois, &slices),
            None => service.download_composite(&slices),
        }
        .map(ServiceResponse::CompositeDownloaded),
    };

    vec![result.unwrap_or_else(|err| failed(operation, series, &err))]
}

fn execute_render_all(
    service: &dyn ImageService,
    slice: usize,
    generations: &[u64],
) -> Vec<ServiceResponse> {
    let encoded = match service.render_all_slices(slice) {
        Ok(encoded) => encoded,
        Err(err) => return vec![failed(Operation::RenderAllSlices, None, &err)],
    };
    if encoded.len() != generations.len() {
        log::warn!(
            "render_all_slices returned {} bitmaps for {} series",
            encoded.len(),
            generations.len()
        );
    }

    encoded
        .iter()
        .zip(generations)
        .enumerate()
        .map(|(series, (bitmap, generation))| match decode_bitmap(bitmap) {
            Ok(bitmap) => ServiceResponse::Bitmap {
                series,
                generation: *generation,
                bitmap: Arc::new(bitmap),
            },
            Err(err) => failed(Operation::RenderAllSlices, Some(series), &err),
        })
        .collect()
}

fn failed(operation: Operation, series: Option<usize>, err: &anyhow::Error) -> ServiceResponse {
    log::warn!("{} failed (series {:?}): {err:#}", operation.name(), series);
    ServiceResponse::Failed {
        operation,
        series,
        message: format!("{err:#}"),
    }
}

type Waker = Arc<dyn Fn() + Send + Sync>;

pub const WORKER_THREADS: usize = 4;

#[derive(Default)]
struct JobQueue {
    jobs: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ServiceRequest>,
    closed: bool,
}

impl JobQueue {
    fn push(&self, request: ServiceRequest) -> usize {
        let mut state = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.pending.len();
        state.pending.retain(|queued| !request.supersedes(queued));
        let dropped = before - state.pending.len();
        state.pending.push_back(request);
        self.ready.notify_one();
        dropped
    }

    fn next(&self) -> Option<ServiceRequest> {
        let mut state = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(request) = state.pending.pop_front() {
                return Some(request);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn close(&self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.ready.notify_all();
    }
}

pub struct ServiceWorker {
    queue: Arc<JobQueue>,
    receiver: Receiver<Vec<ServiceResponse>>,
    waker: Arc<Mutex<Option<Waker>>>,
    in_flight: Arc<AtomicUsize>,
}

impl ServiceWorker {
    pub fn new(service: Arc<dyn ImageService>) -> Self {
        Self::with_threads(service, WORKER_THREADS)
    }

    fn with_threads(service: Arc<dyn ImageService>, threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        let queue = Arc::new(JobQueue::default());
        let waker: Arc<Mutex<Option<Waker>>> = Arc::new(Mutex::new(None));
        let in_flight = Arc::new(AtomicUsize::new(0));
        for _ in 0..threads.max(1) {
            spawn_runner(
                Arc::clone(&service),
                Arc::clone(&queue),
                sender.clone(),
                Arc::clone(&waker),
                Arc::clone(&in_flight),
            );
        }
        Self {
            queue,
            receiver,
            waker,
            in_flight,
        }
    }

    pub fn with_waker(self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
        self
    }

    pub fn submit(&self, request: ServiceRequest) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let dropped = self.queue.push(request);
        if dropped > 0 {
            log::debug!("Dropped {dropped} superseded queued request(s)");
            self.in_flight.fetch_sub(dropped, Ordering::SeqCst);
        }
    }

    pub fn poll(&self) -> Vec<ServiceResponse> {
        let mut responses = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(batch) => responses.extend(batch),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        responses
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for ServiceWorker {
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn spawn_runner(
    service: Arc<dyn ImageService>,
    queue: Arc<JobQueue>,
    sender: Sender<Vec<ServiceResponse>>,
    waker: Arc<Mutex<Option<Waker>>>,
    in_flight: Arc<AtomicUsize>,
) {
    thread::spawn(move || {
        while let Some(request) = queue.next() {
            let responses = execute(service.as_ref(), request);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            if sender.send(responses).is_err() {
                break;
            }
            let waker = waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(waker) = waker {
                waker();
            }
        }
    });
}
