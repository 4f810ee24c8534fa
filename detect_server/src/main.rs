//! Detection demo server binary.
//!
use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use detect_server::{
    config::Args,
    context::AppContext,
    detector::DetectorHandle,
    endpoints::router,
    meter::spawn_meter_logger,
    nn::SsdModelFactory,
    sensors::CaptureDevice,
    surface::Surface,
};
use env_logger::TimestampPrecision;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let surface = Surface::from_dir(&args.images_dir)?;
    let detector = Arc::new(DetectorHandle::new(
        args.detector_options(),
        Arc::new(SsdModelFactory::default()),
    ));
    let camera = args.camera();
    if !camera.is_available() {
        log::warn!("Camera {} not found, webcam demo disabled", &camera.device_name);
    }
    let context = Arc::new(AppContext::new(
        Arc::clone(&detector),
        surface,
        Arc::new(camera),
        args.capture_config(),
    ));

    // Load the model in the background, the page shows the demos once it is ready
    tokio::spawn(async move {
        // Failure is kept in the detector state and shown on the page
        detector.initialize().await.ok();
    });

    spawn_meter_logger(Duration::from_secs(2));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving demo on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(context).into_make_service())
        .await?;

    Ok(())
}
