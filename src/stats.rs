use crate::geometry::NativeExtent;
use crate::history::{HistoryRow, StatSnapshot};
use crate::roi::{Roi, RoiSize};
use crate::service::RoiStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsRequest {
    pub series: usize,
    pub slice: usize,
    pub roi: Roi,
    pub size: RoiSize,
    pub generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InfoPanel {
    stats: Option<RoiStats>,
    roi: Option<Roi>,
    size: RoiSize,
    provenance: String,
    pub x_field: String,
    pub y_field: String,
}

impl InfoPanel {
    pub fn seed(&mut self, roi: Roi, size: RoiSize, provenance: String) {
        self.roi = Some(roi);
        self.size = size;
        self.provenance = provenance;
        self.x_field = roi.x.to_string();
        self.y_field = roi.y.to_string();
    }

    pub fn apply_stats(&mut self, stats: RoiStats) {
        self.stats = Some(stats);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn size(&self) -> RoiSize {
        self.size
    }

    #[cfg(test)]
    pub fn stats(&self) -> Option<&RoiStats> {
        self.stats.as_ref()
    }

    pub fn provenance(&self) -> &str {
        &self.provenance
    }

    pub fn is_active(&self) -> bool {
        self.roi.is_some()
    }

    pub fn mean_line(&self) -> String {
        format!("Mean: {}", self.stats.as_ref().map_or("", |s| s.mean.as_str()))
    }

    pub fn std_line(&self) -> String {
        format!("Std: {}", self.stats.as_ref().map_or("", |s| s.std.as_str()))
    }

    pub fn snapshot(&self) -> StatSnapshot {
        if self.roi.is_none() {
            return StatSnapshot::default();
        }
        let (mean, std) = self
            .stats
            .as_ref()
            .map(|s| (s.mean.clone(), s.std.clone()))
            .unwrap_or_default();
        StatSnapshot {
            mean,
            std,
            info: self.provenance.clone(),
        }
    }

    pub fn parsed_fields(&self) -> Option<(i64, i64)> {
        Some((
            parse_coordinate(&self.x_field)?,
            parse_coordinate(&self.y_field)?,
        ))
    }
}

#[derive(Debug, Default)]
pub struct StatsDispatcher {
    panels: Vec<InfoPanel>,
}

impl StatsDispatcher {
    pub fn new(series_count: usize) -> Self {
        Self {
            panels: vec![InfoPanel::default(); series_count],
        }
    }

    pub fn panel(&self, series: usize) -> Option<&InfoPanel> {
        self.panels.get(series)
    }

    pub fn panel_mut(&mut self, series: usize) -> Option<&mut InfoPanel> {
        self.panels.get_mut(series)
    }

    pub fn prepare(
        &mut self,
        series: usize,
        slice: usize,
        roi: Option<Roi>,
        size: RoiSize,
        provenance_source: (&str, &str),
        generation: u64,
    ) -> Option<StatsRequest> {
        let panel = self.panels.get_mut(series)?;
        let Some(roi) = roi else {
            panel.clear();
            return None;
        };
        let (folder, filename) = provenance_source;
        panel.seed(roi, size, provenance(folder, filename, roi, size));
        Some(StatsRequest {
            series,
            slice,
            roi,
            size,
            generation,
        })
    }

    pub fn relabel(&mut self, series: usize, folder_label: &str, filename: &str) {
        let Some(panel) = self.panels.get_mut(series) else {
            return;
        };
        if let Some(roi) = panel.roi {
            panel.provenance = provenance(folder_label, filename, roi, panel.size);
        }
    }

    pub fn apply(&mut self, series: usize, stats: RoiStats) {
        if let Some(panel) = self.panels.get_mut(series) {
            panel.apply_stats(stats);
        }
    }

    pub fn clear_all(&mut self) {
        self.panels.iter_mut().for_each(InfoPanel::clear);
    }

    pub fn current_stats(&self) -> HistoryRow {
        HistoryRow(self.panels.iter().map(InfoPanel::snapshot).collect())
    }
}

pub fn provenance(folder_label: &str, filename: &str, roi: Roi, size: RoiSize) -> String {
    format!(
        "{folder_label}/{filename}/ROI origin:({},{})/ROI size:{}x{}",
        roi.x, roi.y, size.width, size.height
    )
}

pub fn image_size_line(native: NativeExtent) -> String {
    format!("Image size: {}\u{d7}{}", native.width, native.height)
}

/// Leading-integer parse: optional whitespace and sign, then digits, anything
/// after the digits is ignored. `"12px"` is 12, `"px12"` is nothing.
pub fn parse_coordinate(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }
    let value: i64 = rest[..digits_len].parse().ok()?;
    Some(if negative { -value } else { value })
}

pub fn filter_metadata(text: &str, term: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return normalized;
    }
    normalized
        .lines()
        .filter(|line| line.to_lowercase().contains(&term))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(mean: &str, std: &str) -> RoiStats {
        RoiStats {
            mean: mean.to_string(),
            std: std.to_string(),
        }
    }

    #[test]
    fn provenance_has_folder_file_origin_and_size() {
        let text = provenance(
            "ct_a",
            "slice_004.dcm",
            Roi { x: 12, y: 40 },
            RoiSize::clamped(20, 10),
        );
        assert_eq!(text, "ct_a/slice_004.dcm/ROI origin:(12,40)/ROI size:20x10");
    }

    #[test]
    fn series_without_roi_gets_no_request_and_empty_snapshot() {
        let mut dispatcher = StatsDispatcher::new(2);
        dispatcher.prepare(
            0,
            3,
            Some(Roi { x: 1, y: 2 }),
            RoiSize::default(),
            ("a", "f.dcm"),
            1,
        );
        dispatcher.apply(0, stats("5.5", "1.25"));

        let request = dispatcher.prepare(1, 3, None, RoiSize::default(), ("b", "g.dcm"), 1);
        assert!(request.is_none());

        let row = dispatcher.current_stats();
        assert_eq!(row.cells()[0].mean, "5.5");
        assert_eq!(row.cells()[0].info, "a/f.dcm/ROI origin:(1,2)/ROI size:10x10");
        assert!(row.cells()[1].is_empty());
    }

    #[test]
    fn prepare_reseeds_fields_from_roi() {
        let mut dispatcher = StatsDispatcher::new(1);
        if let Some(panel) = dispatcher.panel_mut(0) {
            panel.x_field = "garbage".to_string();
        }
        let request = dispatcher
            .prepare(0, 7, Some(Roi { x: 30, y: 31 }), RoiSize::default(), ("a", "b"), 4)
            .expect("roi is placed");
        assert_eq!(request.slice, 7);
        assert_eq!(request.generation, 4);
        let panel = dispatcher.panel(0).expect("panel exists");
        assert_eq!(panel.x_field, "30");
        assert_eq!(panel.y_field, "31");
        assert_eq!(panel.mean_line(), "Mean: ");
    }

    #[test]
    fn coordinates_parse_like_leading_integers() {
        assert_eq!(parse_coordinate("42"), Some(42));
        assert_eq!(parse_coordinate("  -7"), Some(-7));
        assert_eq!(parse_coordinate("12px"), Some(12));
        assert_eq!(parse_coordinate("3.9"), Some(3));
        assert_eq!(parse_coordinate(""), None);
        assert_eq!(parse_coordinate("abc"), None);
        assert_eq!(parse_coordinate("-"), None);
    }

    #[test]
    fn malformed_fields_yield_nothing() {
        let panel = InfoPanel {
            x_field: "10".to_string(),
            y_field: "ten".to_string(),
            ..InfoPanel::default()
        };
        assert_eq!(panel.parsed_fields(), None);
    }

    #[test]
    fn metadata_filter_is_case_insensitive() {
        let text = "PatientName: A\r\nModality: CT\rSliceThickness: 1.0";
        assert_eq!(filter_metadata(text, "modality"), "Modality: CT");
        assert_eq!(
            filter_metadata(text, ""),
            "PatientName: A\nModality: CT\nSliceThickness: 1.0"
        );
        assert_eq!(filter_metadata(text, "missing"), "");
    }

    #[test]
    fn image_size_uses_times_sign() {
        assert_eq!(image_size_line(NativeExtent::new(512, 256)), "Image size: 512×256");
    }
}
