//! Supervisor (C10): wires together the process-wide resources and runs
//! the request server and time-sync schedule for the life of the process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bbox::BboxBuffer;
use crate::camera::CameraClient;
use crate::config::Config;
use crate::error::Result;
use crate::metadata::MetadataParser;
use crate::otp::OtpManager;
use crate::serial::BoardController;
use crate::server::{self, Shared};
use crate::storage::Store;

const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(3600);

/// Load configuration, bring up every process-wide resource, then run the
/// request server and per-board time-sync schedules until the process is
/// torn down. The RTSP relay is launched but only its exit status is
/// observed; its internal media pipeline is out of scope here.
pub async fn run(env_path: &Path, json_path: &Path) -> Result<()> {
    let config = Config::from_files(env_path, json_path)?;
    info!(port = config.server.port, "configuration loaded");

    let store = Arc::new(Store::open(Path::new(&config.store.db_file))?);
    info!(db_file = %config.store.db_file, "persistent store ready");

    let camera = Arc::new(CameraClient::new(config.camera.clone())?);
    let buffer = Arc::new(BboxBuffer::new());
    let parser = Arc::new(MetadataParser::new(config.camera.rtsp_url(), buffer.clone()));
    let otp = Arc::new(OtpManager::new());

    let shared = Arc::new(Shared {
        store,
        camera,
        otp,
        buffer,
        parser,
        bbox_cfg: config.bbox.clone(),
    });

    let relay_handle = spawn_relay(&config.relay.sink_url, &config.camera.rtsp_url());
    let time_sync_handle = spawn_time_sync_schedule(config.board.clone());

    let server_cfg = config.server.clone();
    let server_result = server::run(shared, &server_cfg).await;

    relay_handle.abort();
    time_sync_handle.abort();
    server_result
}

/// The RTSP relay re-muxes the camera's primary stream for downstream
/// clients; its internals are an external concern, so this only launches
/// and logs the child process's exit, restarting it on unexpected death.
fn spawn_relay(sink_url: &str, rtsp_url: &str) -> tokio::task::JoinHandle<()> {
    let sink_url = sink_url.to_string();
    let rtsp_url = rtsp_url.to_string();
    tokio::spawn(async move {
        if sink_url.is_empty() {
            info!("no relay sink configured, skipping RTSP relay launch");
            return;
        }
        loop {
            let mut cmd = tokio::process::Command::new("ffmpeg");
            cmd.args(["-i", &rtsp_url, "-map", "0:0", "-c", "copy", "-f", "mpegts", &sink_url]);
            match cmd.status().await {
                Ok(status) => warn!(%status, "RTSP relay exited, restarting"),
                Err(e) => {
                    error!(error = %e, "RTSP relay failed to launch, retrying");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    })
}

fn spawn_time_sync_schedule(board: crate::config::BoardConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TIME_SYNC_INTERVAL);
        loop {
            ticker.tick().await;
            for (&id, device) in &board.ports {
                let device = device.clone();
                tokio::task::spawn_blocking(move || match BoardController::open(&device, id) {
                    Ok(mut controller) => {
                        if let Err(e) = controller.send_time_sync() {
                            warn!(board = id, error = %e, "time sync send failed");
                        }
                    }
                    Err(e) => warn!(board = id, error = %e, "cannot open board for time sync"),
                })
                .await
                .ok();
            }
        }
    })
}
