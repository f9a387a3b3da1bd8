mod app;
mod bitmap;
mod config;
mod dispatch;
mod geometry;
mod history;
mod http_service;
mod launch;
mod navigation;
mod roi;
mod series;
mod service;
mod session;
mod stats;

use std::sync::Arc;

use config::ViewerConfig;
use http_service::HttpImageService;
use launch::LaunchOptions;
use service::ImageService;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (options, mut initial_status) = match launch::parse_launch_options_from_args(&cli_args) {
        Ok(options) => (options, None),
        Err(err) => (
            LaunchOptions::default(),
            Some(format!("Launch URL/args error: {err}")),
        ),
    };

    let config_path = options
        .config_path
        .clone()
        .or_else(config::settings_file_path);
    let mut config = ViewerConfig::load_or_default(config_path.as_deref());
    options.apply_to(&mut config);

    let service: Option<Arc<dyn ImageService>> = match HttpImageService::new(&config.service) {
        Ok(service) => {
            log::info!("Using image service at {}", service.base_url());
            Some(Arc::new(service))
        }
        Err(err) => {
            log::error!("Could not create image service client: {err:#}");
            initial_status.get_or_insert(format!("Image service error: {err:#}"));
            None
        }
    };

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "Slice Compare",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(app::SliceCompareApp::new(
                cc.egui_ctx.clone(),
                service,
                config,
                initial_status,
            )))
        }),
    )
}
