use std::sync::Arc;

use crate::bitmap::DecodedSlice;
use crate::geometry::NativeExtent;
use crate::service::{FolderKind, SeriesLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesDescriptor {
    pub index: usize,
    pub native: NativeExtent,
    pub slice_count: usize,
    pub current_slice: usize,
}

impl SeriesDescriptor {
    pub fn max_index(&self) -> usize {
        self.slice_count.saturating_sub(1)
    }
}

pub struct SeriesViewport {
    descriptor: SeriesDescriptor,
    filename: String,
    folder_kind: FolderKind,
    folder_base_name: String,
    current_folder_name: Option<String>,
    image_generation: u64,
    stats_generation: u64,
    bitmap: Option<Arc<DecodedSlice>>,
    bitmap_revision: u64,
}

impl SeriesViewport {
    pub fn from_layout(index: usize, layout: &SeriesLayout) -> Self {
        Self {
            descriptor: SeriesDescriptor {
                index,
                native: NativeExtent::default(),
                slice_count: slice_count_from_max(layout.max_idx),
                current_slice: 0,
            },
            filename: String::new(),
            folder_kind: layout.folder_kind,
            folder_base_name: layout.folder_base_name.clone(),
            current_folder_name: layout.current_folder_name.clone(),
            image_generation: 0,
            stats_generation: 0,
            bitmap: None,
            bitmap_revision: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn native(&self) -> NativeExtent {
        self.descriptor.native
    }

    pub fn current_slice(&self) -> usize {
        self.descriptor.current_slice
    }

    pub fn slider_max(&self) -> usize {
        self.descriptor.max_index()
    }

    pub fn label(&self) -> String {
        slice_label(self.descriptor.current_slice, self.slider_max())
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn set_filename(&mut self, filename: String) {
        self.filename = filename;
    }

    pub fn folder_kind(&self) -> FolderKind {
        self.folder_kind
    }

    pub fn set_folder_kind(&mut self, kind: FolderKind) {
        self.folder_kind = kind;
    }

    pub fn current_folder_name(&self) -> Option<&str> {
        self.current_folder_name.as_deref()
    }

    pub fn set_current_folder_name(&mut self, name: String) {
        self.current_folder_name = Some(name);
    }

    pub fn folder_label(&self, configured: Option<&str>) -> String {
        if self.folder_kind == FolderKind::Multi {
            if let Some(name) = self.current_folder_name.as_deref().filter(|n| !n.is_empty()) {
                return name.to_string();
            }
        }
        configured
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.folder_base_name)
            .to_string()
    }

    pub fn set_slice(&mut self, slice: usize) -> usize {
        self.descriptor.current_slice = slice.min(self.slider_max());
        self.descriptor.current_slice
    }

    pub fn replace_bound(&mut self, max_idx: i64) {
        self.descriptor.slice_count = slice_count_from_max(max_idx);
        self.descriptor.current_slice = 0;
    }

    pub fn begin_navigation(&mut self) -> u64 {
        self.image_generation += 1;
        self.image_generation
    }

    pub fn image_generation(&self) -> u64 {
        self.image_generation
    }

    pub fn is_current_image(&self, generation: u64) -> bool {
        generation == self.image_generation
    }

    pub fn begin_stats(&mut self) -> u64 {
        self.stats_generation += 1;
        self.stats_generation
    }

    pub fn stats_generation(&self) -> u64 {
        self.stats_generation
    }

    pub fn is_current_stats(&self, generation: u64) -> bool {
        generation == self.stats_generation
    }

    /// Commit a rendered bitmap. Its pixel size becomes the native extent.
    pub fn commit_bitmap(&mut self, bitmap: Arc<DecodedSlice>) {
        self.descriptor.native = NativeExtent::new(bitmap.width, bitmap.height);
        self.bitmap = Some(bitmap);
        self.bitmap_revision += 1;
    }

    pub fn bitmap(&self) -> Option<&Arc<DecodedSlice>> {
        self.bitmap.as_ref()
    }

    pub fn bitmap_revision(&self) -> u64 {
        self.bitmap_revision
    }
}

pub fn slice_label(index: usize, max_index: usize) -> String {
    format!("Slice: {}/{}", index + 1, max_index + 1)
}

fn slice_count_from_max(max_idx: i64) -> usize {
    (max_idx.max(0) as usize).saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(max_idx: i64, kind: FolderKind) -> SeriesLayout {
        SeriesLayout {
            max_idx,
            folder_base_name: "base".to_string(),
            folder_kind: kind,
            current_folder_name: Some("sub_a".to_string()),
        }
    }

    #[test]
    fn slider_tracks_layout_bound() {
        let mut series = SeriesViewport::from_layout(1, &layout(9, FolderKind::Single));
        assert_eq!(series.slider_max(), 9);
        assert_eq!(series.descriptor.slice_count, 10);
        assert_eq!(series.label(), "Slice: 1/10");
        assert_eq!(series.set_slice(4), 4);
        assert_eq!(series.label(), "Slice: 5/10");
        assert_eq!(series.set_slice(40), 9);
    }

    #[test]
    fn replacing_bound_resets_slice() {
        let mut series = SeriesViewport::from_layout(0, &layout(9, FolderKind::Multi));
        series.set_slice(7);
        series.replace_bound(3);
        assert_eq!(series.current_slice(), 0);
        assert_eq!(series.slider_max(), 3);
        series.replace_bound(-1);
        assert_eq!(series.slider_max(), 0);
    }

    #[test]
    fn generations_only_match_latest() {
        let mut series = SeriesViewport::from_layout(0, &layout(2, FolderKind::Single));
        let first = series.begin_navigation();
        let second = series.begin_navigation();
        assert!(!series.is_current_image(first));
        assert!(series.is_current_image(second));

        let stats = series.begin_stats();
        assert!(series.is_current_stats(stats));
        series.begin_stats();
        assert!(!series.is_current_stats(stats));
    }

    #[test]
    fn committing_bitmap_sets_native_extent() {
        let mut series = SeriesViewport::from_layout(0, &layout(2, FolderKind::Single));
        assert!(series.native().is_empty());
        series.commit_bitmap(Arc::new(DecodedSlice {
            width: 512,
            height: 256,
            rgba: vec![0; 512 * 256 * 4],
        }));
        assert_eq!(series.native(), NativeExtent::new(512, 256));
        assert_eq!(series.bitmap_revision(), 1);
    }

    #[test]
    fn folder_label_prefers_selected_subfolder() {
        let multi = SeriesViewport::from_layout(0, &layout(2, FolderKind::Multi));
        assert_eq!(multi.folder_label(Some("configured")), "sub_a");

        let single = SeriesViewport::from_layout(0, &layout(2, FolderKind::Single));
        assert_eq!(single.folder_label(Some("configured")), "configured");
        assert_eq!(single.folder_label(Some("  ")), "base");
        assert_eq!(single.folder_label(None), "base");
    }
}
