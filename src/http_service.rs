use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ServiceSettings;
use crate::history::HistoryRow;
use crate::roi::{Roi, RoiSize};
use crate::service::{
    CompositeDownload, ExportOutcome, FolderKind, FolderSwitch, ImageService, RoiOverlay, RoiStats,
    SeriesLayout,
};

pub struct HttpImageService {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ImageReply {
    image: String,
}

#[derive(Deserialize)]
struct ImagesReply {
    images: Vec<String>,
}

#[derive(Deserialize)]
struct FilenameReply {
    filename: String,
}

#[derive(Deserialize)]
struct MetadataReply {
    metadata: String,
}

#[derive(Deserialize)]
struct FoldersReply {
    folders: Vec<String>,
}

#[derive(Deserialize)]
struct FolderTypeReply {
    folder_type: FolderKind,
}

#[derive(Deserialize)]
struct FolderNameReply {
    folder_name: String,
}

#[derive(Deserialize)]
struct LayoutReply {
    series: Vec<SeriesLayout>,
}

impl HttpImageService {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let base_url = normalize_base_url(&settings.base_url);
        if base_url.is_empty() {
            bail!("Image service URL is empty");
        }
        Ok(Self {
            client: build_http_client(settings)?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> Result<T> {
        let url = operation_url(&self.base_url, operation);
        let bytes = http_post_json(&self.client, &url, &body)?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Unexpected response from {operation}"))
    }
}

impl ImageService for HttpImageService {
    fn session_layout(&self) -> Result<Vec<SeriesLayout>> {
        let reply: LayoutReply = self.call("session_layout", json!({}))?;
        Ok(reply.series)
    }

    fn render_slice(&self, series: usize, slice: usize) -> Result<String> {
        let reply: ImageReply =
            self.call("render_slice", json!({ "series": series, "slice": slice }))?;
        Ok(reply.image)
    }

    fn render_all_slices(&self, slice: usize) -> Result<Vec<String>> {
        let reply: ImagesReply = self.call("render_all_slices", json!({ "slice": slice }))?;
        Ok(reply.images)
    }

    fn filename(&self, series: usize, slice: usize) -> Result<String> {
        let reply: FilenameReply =
            self.call("get_filename", json!({ "series": series, "slice": slice }))?;
        Ok(reply.filename)
    }

    fn metadata(&self, series: usize, slice: usize) -> Result<String> {
        let reply: MetadataReply =
            self.call("get_metadata", json!({ "series": series, "slice": slice }))?;
        Ok(reply.metadata)
    }

    fn compute_roi_stats(
        &self,
        series: usize,
        slice: usize,
        roi: Roi,
        size: RoiSize,
    ) -> Result<RoiStats> {
        self.call(
            "compute_roi_stats",
            json!({
                "series": series,
                "slice": slice,
                "x": roi.x,
                "y": roi.y,
                "width": size.width,
                "height": size.height,
            }),
        )
    }

    fn list_folders(&self, series: usize) -> Result<Vec<String>> {
        let reply: FoldersReply = self.call("list_folders", json!({ "series": series }))?;
        Ok(reply.folders)
    }

    fn folder_type(&self, series: usize) -> Result<FolderKind> {
        let reply: FolderTypeReply = self.call("get_folder_type", json!({ "series": series }))?;
        Ok(reply.folder_type)
    }

    fn switch_folder(&self, series: usize, folder_index: usize) -> Result<FolderSwitch> {
        self.call(
            "switch_folder",
            json!({ "series": series, "folder_index": folder_index }),
        )
    }

    fn current_folder_name(&self, series: usize) -> Result<String> {
        let reply: FolderNameReply =
            self.call("get_current_folder_name", json!({ "series": series }))?;
        Ok(reply.folder_name)
    }

    fn set_tone_matching(&self, enabled: bool) -> Result<()> {
        let _: Value = self.call("set_tone_matching", json!({ "enabled": enabled }))?;
        Ok(())
    }

    fn export_history(&self, rows: &[HistoryRow]) -> Result<ExportOutcome> {
        self.call("export_history", json!({ "rows": rows }))
    }

    fn download_composite(&self, slices: &[usize]) -> Result<CompositeDownload> {
        self.call("download_composite", json!({ "slices": slices }))
    }

    fn download_composite_with_roi(
        &self,
        rois: &[Option<RoiOverlay>],
        slices: &[usize],
    ) -> Result<CompositeDownload> {
        self.call(
            "download_composite_with_roi",
            json!({ "rois": rois, "slices": slices }),
        )
    }
}

fn build_http_client(settings: &ServiceSettings) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .build()
        .context("Could not initialize HTTP client for the image service")
}

fn normalize_base_url(base_url: &str) -> String {
    strip_query_and_fragment(base_url.trim())
        .trim()
        .trim_end_matches('/')
        .to_string()
}

fn strip_query_and_fragment(value: &str) -> &str {
    let query_index = value.find('?').unwrap_or(value.len());
    let fragment_index = value.find('#').unwrap_or(value.len());
    &value[..query_index.min(fragment_index)]
}

fn operation_url(base: &str, operation: &str) -> String {
    format!("{base}/api/{operation}")
}

fn http_post_json(client: &Client, url: &str, body: &Value) -> Result<Vec<u8>> {
    let response = client
        .post(url)
        .header(ACCEPT, "application/json")
        .json(body)
        .send()
        .with_context(|| format!("HTTP request failed for {url}"))?;
    let status = response.status();
    if !status.is_success() {
        let detail = response
            .text()
            .unwrap_or_else(|_| String::from("unable to read error body"));
        bail!("HTTP {status} for {url}: {detail}");
    }

    response
        .bytes()
        .map(|body| body.to_vec())
        .with_context(|| format!("Could not read response body from {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_strips_slashes_query_and_fragment() {
        assert_eq!(
            normalize_base_url(" http://127.0.0.1:8765/ "),
            "http://127.0.0.1:8765"
        );
        assert_eq!(
            normalize_base_url("http://host:8765/viewer/?token=abc#top"),
            "http://host:8765/viewer"
        );
        assert_eq!(normalize_base_url("  "), "");
    }

    #[test]
    fn operations_live_under_api() {
        assert_eq!(
            operation_url("http://host:8765", "render_slice"),
            "http://host:8765/api/render_slice"
        );
    }

    #[test]
    fn empty_url_is_rejected() {
        let settings = ServiceSettings {
            base_url: "/".to_string(),
            ..ServiceSettings::default()
        };
        assert!(HttpImageService::new(&settings).is_err());
    }

    #[test]
    fn replies_decode_from_service_json() {
        let reply: FolderTypeReply =
            serde_json::from_str(r#"{"folder_type": "folder2"}"#).expect("should parse");
        assert_eq!(reply.folder_type, FolderKind::Multi);

        let layout: LayoutReply = serde_json::from_str(
            r#"{"series": [{"max_idx": 4, "folder_base_name": "a"}, {"max_idx": 9, "folder_base_name": "b", "folder_kind": "folder2", "current_folder_name": "x"}]}"#,
        )
        .expect("should parse");
        assert_eq!(layout.series.len(), 2);
        assert_eq!(layout.series[1].current_folder_name.as_deref(), Some("x"));
    }
}
