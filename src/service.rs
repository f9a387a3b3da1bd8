use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};

use crate::history::HistoryRow;
use crate::roi::{Roi, RoiSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FolderKind {
    #[default]
    #[serde(rename = "folder1")]
    Single,
    #[serde(rename = "folder2")]
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLayout {
    pub max_idx: i64,
    pub folder_base_name: String,
    #[serde(default)]
    pub folder_kind: FolderKind,
    #[serde(default)]
    pub current_folder_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiStats {
    #[serde(deserialize_with = "text_or_number")]
    pub mean: String,
    #[serde(deserialize_with = "text_or_number")]
    pub std: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSwitch {
    pub success: bool,
    #[serde(default)]
    pub max_idx: i64,
    #[serde(default)]
    pub match_contrast_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub success: bool,
    #[serde(default, rename = "filePath")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositeDownload {
    pub success: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub individual_files: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiOverlay {
    pub x: u32,
    pub y: u32,
    pub color: String,
    pub width: u32,
    pub height: u32,
}

pub trait ImageService: Send + Sync {
    fn session_layout(&self) -> Result<Vec<SeriesLayout>>;

    fn render_slice(&self, series: usize, slice: usize) -> Result<String>;

    fn render_all_slices(&self, slice: usize) -> Result<Vec<String>>;

    fn filename(&self, series: usize, slice: usize) -> Result<String>;

    fn metadata(&self, series: usize, slice: usize) -> Result<String>;

    fn compute_roi_stats(
        &self,
        series: usize,
        slice: usize,
        roi: Roi,
        size: RoiSize,
    ) -> Result<RoiStats>;

    fn list_folders(&self, series: usize) -> Result<Vec<String>>;

    fn folder_type(&self, series: usize) -> Result<FolderKind>;

    fn switch_folder(&self, series: usize, folder_index: usize) -> Result<FolderSwitch>;

    fn current_folder_name(&self, series: usize) -> Result<String>;

    fn set_tone_matching(&self, enabled: bool) -> Result<()>;

    fn export_history(&self, rows: &[HistoryRow]) -> Result<ExportOutcome>;

    fn download_composite(&self, slices: &[usize]) -> Result<CompositeDownload>;

    fn download_composite_with_roi(
        &self,
        rois: &[Option<RoiOverlay>],
        slices: &[usize],
    ) -> Result<CompositeDownload>;
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}
