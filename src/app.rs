use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eframe::egui::{self, Color32, Sense, TextureHandle, TextureOptions};

use crate::config::ViewerConfig;
use crate::dispatch::ServiceWorker;
use crate::geometry::{fit_rendered_rect, native_rect_to_rendered, RenderedRect};
use crate::history::provenance_lines;
use crate::roi::{PropagationPolicy, RoiColor, SyncMode, ROI_SIZE_MIN};
use crate::service::{FolderKind, ImageService, SeriesLayout};
use crate::session::{Notice, NoticeLevel, Session};
use crate::stats::{image_size_line, parse_coordinate};

const APP_TITLE: &str = "Slice Compare";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const GRID_GAP: f32 = 6.0;
const HEADER_HEIGHT: f32 = 22.0;
const CONTROLS_HEIGHT: f32 = 116.0;
const HISTORY_PANEL_WIDTH: f32 = 360.0;

struct SeriesTexture {
    revision: u64,
    handle: TextureHandle,
}

struct TransientNotice {
    at: egui::Pos2,
    message: String,
    shown_at: Instant,
}

enum HistoryAction {
    Delete(usize),
    ShowInfo(String),
}

pub struct SliceCompareApp {
    ctx: egui::Context,
    config: ViewerConfig,
    service: Option<Arc<dyn ImageService>>,
    layout_receiver: Option<Receiver<Result<Vec<SeriesLayout>, String>>>,
    session: Option<Session>,
    worker: Option<ServiceWorker>,
    textures: Vec<Option<SeriesTexture>>,
    field_dirty: Vec<bool>,
    transient_notices: Vec<TransientNotice>,
    roi_width_field: String,
    roi_height_field: String,
    info_popup: Option<String>,
    status_line: String,
}

impl SliceCompareApp {
    pub fn new(
        ctx: egui::Context,
        service: Option<Arc<dyn ImageService>>,
        config: ViewerConfig,
        initial_status: Option<String>,
    ) -> Self {
        let size = config.roi.size();
        let mut app = Self {
            ctx,
            service,
            layout_receiver: None,
            session: None,
            worker: None,
            textures: Vec::new(),
            field_dirty: Vec::new(),
            transient_notices: Vec::new(),
            roi_width_field: size.width.to_string(),
            roi_height_field: size.height.to_string(),
            info_popup: None,
            status_line: initial_status.unwrap_or_default(),
            config,
        };
        app.request_layout();
        app
    }

    fn request_layout(&mut self) {
        let Some(service) = self.service.clone() else {
            return;
        };
        let ctx = self.ctx.clone();
        let (tx, rx) = mpsc::channel::<Result<Vec<SeriesLayout>, String>>();
        thread::spawn(move || {
            let result = service.session_layout().map_err(|err| format!("{err:#}"));
            let _ = tx.send(result);
            ctx.request_repaint();
        });
        self.layout_receiver = Some(rx);
        if self.status_line.is_empty() {
            self.status_line = "Connecting to image service...".to_string();
        }
    }

    fn poll_layout(&mut self) {
        let Some(receiver) = self.layout_receiver.as_ref() else {
            return;
        };
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err("Layout request ended without a result".into()),
        };
        self.layout_receiver = None;

        match result {
            Ok(layouts) if layouts.is_empty() => {
                self.status_line = "Image service reported no series.".to_string();
            }
            Ok(layouts) => {
                let Some(service) = self.service.clone() else {
                    return;
                };
                let ctx = self.ctx.clone();
                let mut session = Session::new(&layouts, self.config.clone());
                session.start();
                self.textures = layouts.iter().map(|_| None).collect();
                self.field_dirty = vec![false; layouts.len()];
                self.worker =
                    Some(ServiceWorker::new(service).with_waker(move || ctx.request_repaint()));
                self.session = Some(session);
                self.status_line = format!("{} series loaded", layouts.len());
            }
            Err(err) => {
                log::error!("Could not load session layout: {err}");
                self.status_line = format!("Image service error: {err}");
            }
        }
    }

    fn is_loading(&self) -> bool {
        self.layout_receiver.is_some()
            || self
                .worker
                .as_ref()
                .is_some_and(|worker| worker.in_flight() > 0)
    }

    fn pump_service(&mut self) {
        let (Some(session), Some(worker)) = (self.session.as_mut(), self.worker.as_ref()) else {
            return;
        };
        for response in worker.poll() {
            session.handle_response(response);
        }
        for request in session.take_requests() {
            worker.submit(request);
        }
    }

    fn show_notices(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for notice in session.take_notices() {
            match notice {
                Notice::Transient { at, message, .. } => {
                    self.transient_notices.push(TransientNotice {
                        at: egui::pos2(at[0], at[1]),
                        message,
                        shown_at: Instant::now(),
                    });
                }
                Notice::Blocking {
                    level,
                    title,
                    message,
                } => {
                    let level = match level {
                        NoticeLevel::Info => rfd::MessageLevel::Info,
                        NoticeLevel::Error => rfd::MessageLevel::Error,
                    };
                    rfd::MessageDialog::new()
                        .set_level(level)
                        .set_title(title)
                        .set_description(message)
                        .set_buttons(rfd::MessageButtons::Ok)
                        .show();
                }
            }
        }
    }

    fn paint_transient_notices(&mut self, ctx: &egui::Context) {
        let lifetime = Duration::from_millis(self.config.display.transient_notice_ms);
        self.transient_notices
            .retain(|notice| notice.shown_at.elapsed() < lifetime);
        if self.transient_notices.is_empty() {
            return;
        }

        let painter = ctx.layer_painter(egui::LayerId::new(
            egui::Order::Tooltip,
            egui::Id::new("roi-transient-notices"),
        ));
        for notice in &self.transient_notices {
            let galley = painter.layout(
                notice.message.clone(),
                egui::FontId::proportional(13.0),
                Color32::WHITE,
                260.0,
            );
            let origin = notice.at + egui::vec2(12.0, 12.0);
            let frame = egui::Rect::from_min_size(origin, galley.size()).expand(6.0);
            painter.rect_filled(frame, 4.0, Color32::from_rgba_unmultiplied(180, 30, 30, 230));
            painter.galley(origin, galley, Color32::WHITE);
        }

        let next_expiry = self
            .transient_notices
            .iter()
            .map(|notice| lifetime.saturating_sub(notice.shown_at.elapsed()))
            .min()
            .unwrap_or(lifetime);
        ctx.request_repaint_after(next_expiry);
    }

    fn sync_textures(&mut self, ctx: &egui::Context) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        for (index, viewport) in session.series().iter().enumerate() {
            let Some(bitmap) = viewport.bitmap() else {
                continue;
            };
            let Some(slot) = self.textures.get_mut(index) else {
                continue;
            };
            if slot
                .as_ref()
                .is_some_and(|texture| texture.revision == viewport.bitmap_revision())
            {
                continue;
            }
            let color_image = bitmap.to_color_image();
            match slot.as_mut() {
                Some(texture) => {
                    texture.handle.set(color_image, TextureOptions::LINEAR);
                    texture.revision = viewport.bitmap_revision();
                }
                None => {
                    *slot = Some(SeriesTexture {
                        revision: viewport.bitmap_revision(),
                        handle: ctx.load_texture(
                            format!("series-{index}"),
                            color_image,
                            TextureOptions::LINEAR,
                        ),
                    });
                }
            }
        }
    }

    fn commit_roi_size(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let min = i64::from(ROI_SIZE_MIN);
        let width = parse_coordinate(&self.roi_width_field).unwrap_or(min);
        let height = parse_coordinate(&self.roi_height_field).unwrap_or(min);
        let size = session.set_roi_size(width, height);
        self.roi_width_field = size.width.to_string();
        self.roi_height_field = size.height.to_string();
    }

    fn show_toolbar(&mut self, ui: &mut egui::Ui) {
        let mut size_committed = false;
        let mut preset = None;
        ui.horizontal_wrapped(|ui| {
            ui.label("ROI");
            for field in [&mut self.roi_width_field, &mut self.roi_height_field] {
                let response = ui.add(egui::TextEdit::singleline(field).desired_width(36.0));
                if response.lost_focus() {
                    size_committed = true;
                }
            }
            for size in self.config.roi.preset_sizes() {
                if ui.small_button(size.to_string()).clicked() {
                    preset = Some(size);
                }
            }

            let Some(session) = self.session.as_mut() else {
                return;
            };
            ui.separator();
            let mode = session.roi().mode();
            if ui
                .selectable_label(mode == SyncMode::Synchronized, "Synchronized")
                .clicked()
            {
                session.set_mode(SyncMode::Synchronized);
            }
            if ui
                .selectable_label(mode == SyncMode::Independent, "Independent")
                .clicked()
            {
                session.set_mode(SyncMode::Independent);
            }
            if mode == SyncMode::Synchronized {
                let propagation = match session.roi().propagation() {
                    PropagationPolicy::Unchecked => "copies to all",
                    PropagationPolicy::Checked => "copies where it fits",
                };
                ui.weak(propagation);
            }

            ui.separator();
            let mut rgb = session.roi().color().to_array();
            if egui::color_picker::color_edit_button_srgb(ui, &mut rgb).changed() {
                session.set_roi_color(RoiColor::rgb(rgb[0], rgb[1], rgb[2]));
            }
            if ui.button("Reset ROIs").clicked() {
                session.reset_rois();
            }

            ui.separator();
            let tone_matching = session.tone_matching();
            ui.label("Tone matching");
            if ui.selectable_label(tone_matching, "On").clicked() {
                session.set_tone_matching(true);
            }
            if ui.selectable_label(!tone_matching, "Off").clicked() {
                session.set_tone_matching(false);
            }

            ui.separator();
            if ui.button("Download images").clicked() {
                session.download_composite(false);
            }
            if ui.button("Download with ROI").clicked() {
                session.download_composite(true);
            }
        });

        if let Some(size) = preset {
            self.roi_width_field = size.width.to_string();
            self.roi_height_field = size.height.to_string();
            size_committed = true;
        }
        if size_committed {
            self.commit_roi_size();
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        ui.horizontal(|ui| {
            let navigator = session.navigator();
            let max_index = navigator.max_index();
            let mut index = navigator.index();
            ui.label(navigator.label());
            let response = ui.add_sized(
                [ui.available_width().max(120.0), 18.0],
                egui::Slider::new(&mut index, 0..=max_index).show_value(false),
            );
            if response.changed() {
                session.set_global_slice(index);
            }
        });
    }

    fn show_grid(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            ui.centered_and_justified(|ui| {
                ui.label(self.status_line.as_str());
            });
            return;
        };
        let count = session.series_count();
        let columns = count.min(self.config.display.max_columns.max(1)).max(1);
        let rows = count.div_ceil(columns);

        ui.spacing_mut().item_spacing = egui::vec2(GRID_GAP, GRID_GAP);
        let available = ui.available_size();
        let cell_size = egui::vec2(
            ((available.x - GRID_GAP * (columns - 1) as f32) / columns as f32).max(80.0),
            ((available.y - GRID_GAP * (rows - 1) as f32) / rows as f32).max(CONTROLS_HEIGHT + 80.0),
        );

        for row in 0..rows {
            ui.horizontal(|ui| {
                for column in 0..columns {
                    let index = row * columns + column;
                    if index >= count {
                        break;
                    }
                    ui.allocate_ui_with_layout(
                        cell_size,
                        egui::Layout::top_down(egui::Align::Min),
                        |ui| {
                            egui::Frame::none()
                                .stroke(egui::Stroke::new(1.0, Color32::from_gray(60)))
                                .inner_margin(egui::Margin::same(4.0))
                                .show(ui, |ui| {
                                    show_series_cell(
                                        ui,
                                        session,
                                        index,
                                        self.textures.get(index).and_then(Option::as_ref),
                                        &mut self.field_dirty,
                                    );
                                });
                        },
                    );
                }
            });
        }
    }

    fn show_history(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        ui.heading(format!("History ({} rows)", session.history().len()));
        ui.horizontal(|ui| {
            if ui.button("Save (Ctrl+S)").clicked() {
                session.record_snapshot();
            }
            if ui.button("Reset history").clicked() {
                session.clear_history();
            }
            if ui.button("Export").clicked() {
                session.export_history();
            }
        });
        ui.separator();

        let columns = session.series_count();
        let aggregate = session.history_aggregate();
        let mut action = None;
        egui::ScrollArea::both().show(ui, |ui| {
            egui::Grid::new("history-table")
                .striped(true)
                .num_columns(columns * 3 + 2)
                .show(ui, |ui| {
                    ui.strong("#");
                    for series in 0..columns {
                        ui.strong(format!("S{} mean", series + 1));
                        ui.strong("std");
                        ui.label("");
                    }
                    ui.label("");
                    ui.end_row();

                    for (position, row) in session.history().rows().iter().enumerate() {
                        ui.label((position + 1).to_string());
                        for series in 0..columns {
                            match row.cells().get(series) {
                                Some(cell) => {
                                    ui.label(cell.mean.as_str());
                                    ui.label(cell.std.as_str());
                                    if cell.info.is_empty() {
                                        ui.label("");
                                    } else if ui.small_button("i").clicked() {
                                        action = Some(HistoryAction::ShowInfo(cell.info.clone()));
                                    }
                                }
                                None => {
                                    ui.label("");
                                    ui.label("");
                                    ui.label("");
                                }
                            }
                        }
                        if ui.small_button("Delete").clicked() {
                            action = Some(HistoryAction::Delete(position));
                        }
                        ui.end_row();
                    }

                    ui.strong("Avg");
                    for series in 0..columns {
                        let column = aggregate.get(series).copied().unwrap_or_default();
                        ui.strong(column.mean_text());
                        ui.strong(column.std_text());
                        ui.label("");
                    }
                    ui.label("");
                    ui.end_row();
                });
        });

        match action {
            Some(HistoryAction::Delete(position)) => {
                if let Err(err) = session.delete_history_row(position) {
                    log::warn!("{err}");
                }
            }
            Some(HistoryAction::ShowInfo(info)) => self.info_popup = Some(provenance_lines(&info)),
            None => {}
        }
    }

    fn show_windows(&mut self, ctx: &egui::Context) {
        if let Some(info) = self.info_popup.clone() {
            let mut open = true;
            egui::Window::new("ROI info")
                .open(&mut open)
                .collapsible(false)
                .resizable(false)
                .show(ctx, |ui| {
                    ui.label(info);
                });
            if !open {
                self.info_popup = None;
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(selector) = session.folder_selector().cloned() {
            let mut open = true;
            let mut chosen = None;
            egui::Window::new(format!("Folders: series {}", selector.series + 1))
                .open(&mut open)
                .collapsible(false)
                .show(ctx, |ui| {
                    for (index, folder) in selector.folders.iter().enumerate() {
                        if ui.button(folder).clicked() {
                            chosen = Some(index);
                        }
                    }
                });
            if let Some(folder_index) = chosen {
                session.select_folder(selector.series, folder_index);
            } else if !open {
                session.close_folder_selector();
            }
        }

        let mut close_metadata = false;
        if let Some(view) = session.metadata_view_mut() {
            let mut open = true;
            egui::Window::new(format!(
                "Metadata: series {}, slice {}",
                view.series + 1,
                view.slice + 1
            ))
            .open(&mut open)
            .default_size([420.0, 480.0])
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Search");
                    ui.text_edit_singleline(&mut view.search);
                });
                ui.separator();
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.monospace(view.filtered());
                });
            });
            close_metadata = !open;
        }
        if close_metadata {
            session.close_metadata();
        }
    }
}

fn show_series_cell(
    ui: &mut egui::Ui,
    session: &mut Session,
    index: usize,
    texture: Option<&SeriesTexture>,
    field_dirty: &mut [bool],
) {
    let folder_label = session.folder_label(index);
    let Some(viewport) = session.series().get(index) else {
        return;
    };
    let folder_kind = viewport.folder_kind();
    let filename = viewport.filename().to_string();
    let native = viewport.native();
    let slider_max = viewport.slider_max();
    let mut slice = viewport.current_slice();
    let slice_label = viewport.label();

    ui.horizontal(|ui| {
        ui.set_height(HEADER_HEIGHT);
        if folder_kind == FolderKind::Multi {
            if ui.button(format!("{folder_label} \u{25bc}")).clicked() {
                session.toggle_folder_selector(index);
            }
        } else if ui
            .add(egui::Label::new(egui::RichText::new(folder_label.as_str()).strong()).sense(Sense::click()))
            .clicked()
        {
            session.toggle_folder_selector(index);
        }
        ui.label(filename.as_str());
        if ui.small_button("Metadata").clicked() {
            session.show_metadata(index);
        }
    });

    let image_size = egui::vec2(
        ui.available_width(),
        (ui.available_height() - CONTROLS_HEIGHT).max(40.0),
    );
    let (area, response) = ui.allocate_exact_size(image_size, Sense::click());
    let painter = ui.painter_at(area);
    painter.rect_filled(area, 0.0, Color32::BLACK);

    let available = RenderedRect::new(area.left(), area.top(), area.width(), area.height());
    let rendered = fit_rendered_rect(native, available);
    if let (Some(texture), Some(rendered)) = (texture, rendered) {
        let image_rect = to_egui_rect(rendered);
        painter.image(
            texture.handle.id(),
            image_rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            Color32::WHITE,
        );

        // Re-derived every paint from the current layout.
        if let Some(overlay) = session.overlay(index) {
            let drawn = native_rect_to_rendered(
                overlay.roi.x,
                overlay.roi.y,
                overlay.size.width,
                overlay.size.height,
                native,
                rendered,
            );
            if let Some(drawn) = drawn {
                let [r, g, b] = overlay.color.to_array();
                let color = Color32::from_rgb(r, g, b);
                let rect = to_egui_rect(drawn);
                painter.rect_filled(rect, 0.0, color.gamma_multiply(0.2));
                painter.rect_stroke(rect, 0.0, egui::Stroke::new(2.0, color));
            }
        }
    }

    if response.clicked() {
        if let Some(pointer) = response.interact_pointer_pos() {
            let target = rendered.unwrap_or(available);
            session.place_roi_at_pointer(index, [pointer.x, pointer.y], target);
        }
    }

    ui.horizontal(|ui| {
        ui.label(slice_label);
        let response = ui.add(egui::Slider::new(&mut slice, 0..=slider_max).show_value(false));
        if response.changed() {
            session.set_series_slice(index, slice);
        }
    });

    ui.label(image_size_line(native));
    let mut commit_fields = false;
    if let Some(panel) = session.info_panel_mut(index) {
        if panel.is_active() {
            let size = panel.size();
            ui.horizontal(|ui| {
                ui.label("[");
                for field in [&mut panel.x_field, &mut panel.y_field] {
                    let response = ui.add(egui::TextEdit::singleline(field).desired_width(44.0));
                    if response.changed() {
                        if let Some(dirty) = field_dirty.get_mut(index) {
                            *dirty = true;
                        }
                    }
                    if response.lost_focus()
                        && field_dirty.get(index).copied().unwrap_or(false)
                    {
                        commit_fields = true;
                    }
                }
                ui.label(format!("] {size}"));
            });
            ui.label(panel.mean_line())
                .on_hover_text(panel.provenance());
            ui.label(panel.std_line());
        }
    }
    if commit_fields {
        if let Some(dirty) = field_dirty.get_mut(index) {
            *dirty = false;
        }
        session.update_roi_from_fields(index);
    }
}

fn to_egui_rect(rect: RenderedRect) -> egui::Rect {
    egui::Rect::from_min_size(
        egui::pos2(rect.left, rect.top),
        egui::vec2(rect.width, rect.height),
    )
}

impl eframe::App for SliceCompareApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.is_loading() {
            ctx.set_cursor_icon(egui::CursorIcon::Progress);
        } else {
            ctx.set_cursor_icon(egui::CursorIcon::Default);
        }
        self.poll_layout();
        self.pump_service();
        self.sync_textures(ctx);

        let save_pressed =
            ctx.input_mut(|input| input.consume_key(egui::Modifiers::COMMAND, egui::Key::S));
        if save_pressed {
            if let Some(session) = self.session.as_mut() {
                session.record_snapshot();
            }
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.strong(format!("{APP_TITLE} v{APP_VERSION}"));
                ui.separator();
                ui.label(self.status_line.as_str());
            });
            self.show_toolbar(ui);
        });

        egui::SidePanel::right("history")
            .resizable(true)
            .default_width(HISTORY_PANEL_WIDTH)
            .show(ctx, |ui| {
                self.show_history(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_grid(ui);
        });

        self.show_windows(ctx);

        // Handlers above may have queued work or raised notices this frame.
        self.pump_service();
        self.show_notices();
        self.paint_transient_notices(ctx);
    }
}
