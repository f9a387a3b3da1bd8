use crate::config::ViewerConfig;
use crate::dispatch::{ServiceRequest, ServiceResponse};
use crate::geometry::{pointer_to_native, RenderedRect};
use crate::history::{ColumnAggregate, HistoryError, HistoryLedger, HistoryRow};
use crate::navigation::{BoundChange, GlobalNavigator};
use crate::roi::{
    InputChannel, PresentationHint, Roi, RoiColor, RoiEngine, RoiSize, SyncMode,
    ValidationOutcome,
};
use crate::series::SeriesViewport;
use crate::service::{CompositeDownload, ExportOutcome, FolderKind, RoiOverlay, SeriesLayout};
use crate::stats::{filter_metadata, InfoPanel, StatsDispatcher};

pub const EMPTY_HISTORY_MESSAGE: &str = "No history rows to export.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Transient {
        series: usize,
        at: [f32; 2],
        message: String,
    },
    Blocking {
        level: NoticeLevel,
        title: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSelector {
    pub series: usize,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataView {
    pub series: usize,
    pub slice: usize,
    pub text: String,
    pub search: String,
}

impl MetadataView {
    pub fn filtered(&self) -> String {
        filter_metadata(&self.text, &self.search)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayParams {
    pub roi: Roi,
    pub size: RoiSize,
    pub color: RoiColor,
}

pub struct Session {
    config: ViewerConfig,
    series: Vec<SeriesViewport>,
    roi: RoiEngine,
    navigator: GlobalNavigator,
    stats: StatsDispatcher,
    history: HistoryLedger,
    tone_matching: bool,
    folder_selector: Option<FolderSelector>,
    metadata: Option<MetadataView>,
    outbox: Vec<ServiceRequest>,
    notices: Vec<Notice>,
}

impl Session {
    pub fn new(layouts: &[SeriesLayout], config: ViewerConfig) -> Self {
        let series: Vec<SeriesViewport> = layouts
            .iter()
            .enumerate()
            .map(|(index, layout)| SeriesViewport::from_layout(index, layout))
            .collect();
        let bounds: Vec<usize> = series.iter().map(SeriesViewport::slider_max).collect();
        let roi = RoiEngine::new(series.len()).with_settings(
            config.roi.size(),
            config.roi.mode,
            config.roi.color,
            config.roi.propagation,
        );
        Self {
            stats: StatsDispatcher::new(series.len()),
            navigator: GlobalNavigator::new(&bounds),
            history: HistoryLedger::new(),
            roi,
            series,
            config,
            tone_matching: false,
            folder_selector: None,
            metadata: None,
            outbox: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        log::info!("Starting session with {} series", self.series.len());
        for index in 0..self.series.len() {
            self.load_series_slice(index);
        }
    }

    pub fn take_requests(&mut self) -> Vec<ServiceRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn series(&self) -> &[SeriesViewport] {
        &self.series
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn roi(&self) -> &RoiEngine {
        &self.roi
    }

    pub fn navigator(&self) -> &GlobalNavigator {
        &self.navigator
    }

    #[cfg(test)]
    pub fn info_panel(&self, series: usize) -> Option<&InfoPanel> {
        self.stats.panel(series)
    }

    pub fn info_panel_mut(&mut self, series: usize) -> Option<&mut InfoPanel> {
        self.stats.panel_mut(series)
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    pub fn tone_matching(&self) -> bool {
        self.tone_matching
    }

    pub fn folder_selector(&self) -> Option<&FolderSelector> {
        self.folder_selector.as_ref()
    }

    #[cfg(test)]
    pub fn metadata_view(&self) -> Option<&MetadataView> {
        self.metadata.as_ref()
    }

    pub fn metadata_view_mut(&mut self) -> Option<&mut MetadataView> {
        self.metadata.as_mut()
    }

    pub fn close_metadata(&mut self) {
        self.metadata = None;
    }

    pub fn folder_label(&self, series: usize) -> String {
        self.series
            .get(series)
            .map(|viewport| viewport.folder_label(self.config.display.default_folder_name(series)))
            .unwrap_or_default()
    }

    pub fn overlay(&self, series: usize) -> Option<OverlayParams> {
        Some(OverlayParams {
            roi: self.roi.slot(series)?,
            size: self.roi.size(),
            color: self.roi.color(),
        })
    }

    // Navigation

    pub fn set_series_slice(&mut self, series: usize, slice: usize) {
        let Some(viewport) = self.series.get_mut(series) else {
            return;
        };
        viewport.set_slice(slice);
        self.load_series_slice(series);
    }

    pub fn set_global_slice(&mut self, index: usize) {
        let index = self.navigator.set_index(index);
        let mut generations = Vec::with_capacity(self.series.len());
        for viewport in &mut self.series {
            viewport.set_slice(index);
            let generation = viewport.begin_navigation();
            generations.push(generation);
            self.outbox.push(ServiceRequest::Filename {
                series: viewport.index(),
                slice: viewport.current_slice(),
                generation,
            });
        }
        self.outbox.push(ServiceRequest::RenderAllSlices {
            slice: index,
            generations,
        });
    }

    pub fn redraw_all(&mut self) {
        for index in 0..self.series.len() {
            self.load_series_slice(index);
        }
    }

    fn load_series_slice(&mut self, series: usize) {
        let Some(viewport) = self.series.get_mut(series) else {
            return;
        };
        let generation = viewport.begin_navigation();
        let slice = viewport.current_slice();
        self.outbox.push(ServiceRequest::Filename {
            series,
            slice,
            generation,
        });
        self.outbox.push(ServiceRequest::RenderSlice {
            series,
            slice,
            generation,
        });
    }

    fn recompute_global_bound(&mut self) {
        let bounds: Vec<usize> = self.series.iter().map(SeriesViewport::slider_max).collect();
        match self.navigator.recompute(&bounds) {
            BoundChange::Shrunk => log::info!(
                "Global bound shrank to {}; global slice reset",
                self.navigator.max_index()
            ),
            BoundChange::Grew => log::info!("Global bound grew to {}", self.navigator.max_index()),
            BoundChange::Unchanged => {}
        }
    }

    // ROI

    pub fn place_roi_at_pointer(
        &mut self,
        series: usize,
        pointer: [f32; 2],
        rendered: RenderedRect,
    ) -> Option<ValidationOutcome> {
        let native = self.series.get(series)?.native();
        // Before the first bitmap there is no native extent; (0, 0) is then
        // rejected by validation like any other out-of-bounds origin.
        let (x, y) = pointer_to_native(pointer[0], pointer[1], native, rendered).unwrap_or((0, 0));
        Some(self.place_roi(series, x, y, InputChannel::Pointer { at: pointer }))
    }

    /// Commit the coordinate fields of `series`' info panel. Non-numeric
    /// input is ignored without a message.
    pub fn update_roi_from_fields(&mut self, series: usize) -> Option<ValidationOutcome> {
        let (x, y) = self.stats.panel(series)?.parsed_fields()?;
        Some(self.place_roi(series, x, y, InputChannel::Fields))
    }

    fn place_roi(&mut self, series: usize, x: i64, y: i64, channel: InputChannel) -> ValidationOutcome {
        let extents: Vec<_> = self.series.iter().map(SeriesViewport::native).collect();
        let outcome = self.roi.place(series, x, y, &extents, channel);
        match &outcome {
            ValidationOutcome::Accepted(placement) => {
                if !placement.skipped.is_empty() {
                    log::info!(
                        "ROI ({}, {}) not propagated to series {:?}: outside their bounds",
                        x,
                        y,
                        placement.skipped
                    );
                }
                for index in placement.updated.clone() {
                    self.refresh_stats(index);
                }
            }
            ValidationOutcome::Rejected { error, hint } => {
                log::debug!("Rejected ROI on series {series}: {error}");
                let message = error.to_string();
                self.notices.push(match *hint {
                    PresentationHint::Transient { at } => Notice::Transient {
                        series,
                        at,
                        message,
                    },
                    PresentationHint::Blocking => Notice::Blocking {
                        level: NoticeLevel::Error,
                        title: "Invalid ROI".to_string(),
                        message,
                    },
                });
            }
        }
        outcome
    }

    pub fn set_roi_size(&mut self, width: i64, height: i64) -> RoiSize {
        self.roi.set_size(width, height)
    }

    pub fn reset_rois(&mut self) {
        self.roi.reset_all();
        self.stats.clear_all();
        for viewport in &mut self.series {
            viewport.begin_stats();
        }
    }

    pub fn set_roi_color(&mut self, color: RoiColor) {
        if self.roi.set_color(color) {
            log::debug!("ROI color set to {color}");
        }
    }

    pub fn set_mode(&mut self, mode: SyncMode) {
        if self.roi.set_mode(mode) {
            log::info!("ROI mode set to {mode:?}");
        }
    }

    fn refresh_stats(&mut self, series: usize) {
        let folder = self.folder_label(series);
        let Some(viewport) = self.series.get_mut(series) else {
            return;
        };
        let generation = viewport.begin_stats();
        let request = self.stats.prepare(
            series,
            viewport.current_slice(),
            self.roi.slot(series),
            self.roi.size(),
            (&folder, viewport.filename()),
            generation,
        );
        if let Some(request) = request {
            self.outbox.push(ServiceRequest::RoiStats(request));
        }
    }

    // Tone matching and folders

    pub fn set_tone_matching(&mut self, enabled: bool) {
        if self.tone_matching == enabled {
            return;
        }
        self.tone_matching = enabled;
        self.outbox.push(ServiceRequest::ToneMatching { enabled });
    }

    pub fn toggle_folder_selector(&mut self, series: usize) {
        if self.folder_selector.as_ref().is_some_and(|open| open.series == series) {
            self.folder_selector = None;
            return;
        }
        self.folder_selector = None;
        self.outbox.push(ServiceRequest::FolderType { series });
    }

    pub fn close_folder_selector(&mut self) {
        self.folder_selector = None;
    }

    pub fn select_folder(&mut self, series: usize, folder_index: usize) {
        self.folder_selector = None;
        self.outbox.push(ServiceRequest::SwitchFolder {
            series,
            folder_index,
        });
    }

    pub fn show_metadata(&mut self, series: usize) {
        let Some(viewport) = self.series.get(series) else {
            return;
        };
        self.outbox.push(ServiceRequest::Metadata {
            series,
            slice: viewport.current_slice(),
        });
    }

    // History

    pub fn record_snapshot(&mut self) {
        let row = self.stats.current_stats();
        let position = self.history.record(row);
        log::debug!("Recorded history row {position}");
    }

    pub fn delete_history_row(&mut self, position: usize) -> Result<HistoryRow, HistoryError> {
        self.history.delete_row(position)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history_aggregate(&self) -> Vec<ColumnAggregate> {
        self.history.aggregate(self.config.history.denominator)
    }

    pub fn export_history(&mut self) {
        if self.history.is_empty() {
            self.notices.push(Notice::Blocking {
                level: NoticeLevel::Info,
                title: "Export".to_string(),
                message: EMPTY_HISTORY_MESSAGE.to_string(),
            });
            return;
        }
        self.outbox.push(ServiceRequest::ExportHistory {
            rows: self.history.rows().to_vec(),
        });
    }

    // Composite downloads

    pub fn download_composite(&mut self, with_roi: bool) {
        let slices: Vec<usize> = self.series.iter().map(SeriesViewport::current_slice).collect();
        let rois: Option<Vec<Option<RoiOverlay>>> = with_roi.then(|| {
            let size = self.roi.size();
            let color = self.roi.color().to_string();
            self.roi
                .slots()
                .iter()
                .map(|slot| {
                    slot.map(|roi| RoiOverlay {
                        x: roi.x,
                        y: roi.y,
                        color: color.clone(),
                        width: size.width,
                        height: size.height,
                    })
                })
                .collect()
        });
        self.outbox
            .push(ServiceRequest::DownloadComposite { rois, slices });
    }

    // Completions

    pub fn handle_response(&mut self, response: ServiceResponse) {
        match response {
            ServiceResponse::Bitmap {
                series,
                generation,
                bitmap,
            } => {
                let Some(viewport) = self.series.get_mut(series) else {
                    return;
                };
                if !viewport.is_current_image(generation) {
                    log::debug!(
                        "Dropping stale bitmap for series {series} (generation {generation}, current {})",
                        viewport.image_generation()
                    );
                    return;
                }
                viewport.commit_bitmap(bitmap);
                self.refresh_stats(series);
            }
            ServiceResponse::Filename {
                series,
                generation,
                filename,
            } => {
                let folder = self.folder_label(series);
                let Some(viewport) = self.series.get_mut(series) else {
                    return;
                };
                if !viewport.is_current_image(generation) {
                    log::debug!(
                        "Dropping stale filename for series {series} (generation {generation}, current {})",
                        viewport.image_generation()
                    );
                    return;
                }
                viewport.set_filename(filename);
                self.stats.relabel(series, &folder, viewport.filename());
            }
            ServiceResponse::RoiStats { request, stats } => {
                let Some(viewport) = self.series.get(request.series) else {
                    return;
                };
                if !viewport.is_current_stats(request.generation) {
                    log::debug!(
                        "Dropping stale stats for series {} (generation {}, current {})",
                        request.series,
                        request.generation,
                        viewport.stats_generation()
                    );
                    return;
                }
                self.stats.apply(request.series, stats);
            }
            ServiceResponse::Metadata {
                series,
                slice,
                text,
            } => {
                self.metadata = Some(MetadataView {
                    series,
                    slice,
                    text,
                    search: String::new(),
                });
            }
            ServiceResponse::FolderType { series, kind } => {
                if let Some(viewport) = self.series.get_mut(series) {
                    viewport.set_folder_kind(kind);
                }
                if kind == FolderKind::Multi {
                    self.outbox.push(ServiceRequest::ListFolders { series });
                }
            }
            ServiceResponse::Folders { series, folders } => {
                self.folder_selector = Some(FolderSelector { series, folders });
            }
            ServiceResponse::FolderSwitched { series, outcome } => {
                if !outcome.success {
                    self.notices.push(Notice::Blocking {
                        level: NoticeLevel::Error,
                        title: "Folder".to_string(),
                        message: format!("Could not switch folder for series {}.", series + 1),
                    });
                    return;
                }
                let Some(viewport) = self.series.get_mut(series) else {
                    return;
                };
                log::info!("Series {series} switched folder; new max index {}", outcome.max_idx);
                viewport.replace_bound(outcome.max_idx);
                self.load_series_slice(series);
                self.outbox.push(ServiceRequest::CurrentFolderName { series });
                self.recompute_global_bound();
                if outcome.match_contrast_enabled {
                    self.redraw_all();
                }
            }
            ServiceResponse::FolderName { series, name } => {
                let Some(viewport) = self.series.get_mut(series) else {
                    return;
                };
                viewport.set_current_folder_name(name);
                let folder = self.folder_label(series);
                if let Some(viewport) = self.series.get(series) {
                    self.stats.relabel(series, &folder, viewport.filename());
                }
            }
            ServiceResponse::ToneMatching { enabled } => {
                log::info!("Tone matching {}", if enabled { "on" } else { "off" });
                self.redraw_all();
            }
            ServiceResponse::Exported(outcome) => self.notices.push(export_notice(&outcome)),
            ServiceResponse::CompositeDownloaded(download) => {
                self.notices.push(composite_notice(&download));
            }
            ServiceResponse::Failed {
                operation,
                series,
                message,
            } => {
                let title = match series {
                    Some(series) => format!("{} failed (series {})", operation.name(), series + 1),
                    None => format!("{} failed", operation.name()),
                };
                self.notices.push(Notice::Blocking {
                    level: NoticeLevel::Error,
                    title,
                    message,
                });
            }
        }
    }
}

fn export_notice(outcome: &ExportOutcome) -> Notice {
    if outcome.success {
        let location = outcome.file_path.as_deref().unwrap_or("(unknown location)");
        Notice::Blocking {
            level: NoticeLevel::Info,
            title: "Export".to_string(),
            message: format!("History exported to {location}"),
        }
    } else {
        Notice::Blocking {
            level: NoticeLevel::Error,
            title: "Export".to_string(),
            message: format!(
                "Export failed: {}",
                outcome.message.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

fn composite_notice(download: &CompositeDownload) -> Notice {
    if !download.success {
        return Notice::Blocking {
            level: NoticeLevel::Error,
            title: "Download".to_string(),
            message: format!(
                "Saving images failed: {}",
                download.error.as_deref().unwrap_or("unknown error")
            ),
        };
    }

    let mut message = String::from("Images saved:\n");
    message.push_str(&format!(
        "Composite: {}\n",
        download.filename.as_deref().unwrap_or_default()
    ));
    if !download.individual_files.is_empty() {
        message.push_str("Individual images:\n");
        for file in &download.individual_files {
            message.push_str(&format!("  - {file}\n"));
        }
    }
    message.push_str(&format!(
        "Saved to: {}",
        last_path_components(download.file_path.as_deref().unwrap_or_default(), 2)
    ));
    Notice::Blocking {
        level: NoticeLevel::Info,
        title: "Download".to_string(),
        message,
    }
}

fn last_path_components(path: &str, count: usize) -> String {
    let normalized = path.replace('\\', "/");
    let parts: Vec<&str> = normalized.split('/').collect();
    parts[parts.len().saturating_sub(count)..].join("/")
}
