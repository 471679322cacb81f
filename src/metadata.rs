//! Metadata parser: owns the ffmpeg subprocess that reads the camera's
//! secondary RTSP stream (`map 0:1`) as an XML object-detection feed,
//! extracts complete `</tt:MetadataStream>` blocks, and feeds each one to
//! the [`BboxBuffer`] as a [`BboxFrame`].

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::bbox::{BboxBuffer, BboxEvent, BboxFrame};
use crate::error::{NvrError, Result};

const METADATA_STREAM_END: &str = "</tt:MetadataStream>";

static OBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<tt:Object ObjectId="(\d+)">.*?<tt:BoundingBox left="(\d+\.?\d*)" top="(\d+\.?\d*)" right="(\d+\.?\d*)" bottom="(\d+\.?\d*)"\s*/>(.*?)</tt:Object>"#,
    )
    .expect("static object regex is valid")
});

static CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<tt:ClassCandidate>\s*<tt:Type>(\w+)</tt:Type>\s*<tt:Likelihood>([\d.]+)</tt:Likelihood>"#)
        .expect("static class regex is valid")
});

/// Owns the subprocess lifecycle and the shared bbox buffer it feeds.
/// Launch failure is fatal only to this component: `start` returns an
/// error to the caller, the rest of the server keeps running.
pub struct MetadataParser {
    rtsp_url: String,
    buffer: Arc<BboxBuffer>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    child: Arc<Mutex<Option<Child>>>,
}

impl MetadataParser {
    pub fn new(rtsp_url: String, buffer: Arc<BboxBuffer>) -> Self {
        MetadataParser {
            rtsp_url,
            buffer,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch `ffmpeg -i <rtsp_url> -map 0:1 -f data -` and start the read
    /// loop. A no-op if already running.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-i", &self.rtsp_url, "-map", "0:1", "-f", "data", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| NvrError::Parser(format!("ffmpeg launch failed: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NvrError::Parser("ffmpeg child has no stdout pipe".into()))?;

        self.running.store(true, Ordering::SeqCst);
        *self.child.lock() = Some(child);

        let buffer = self.buffer.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            read_loop(stdout, buffer, running).await;
        });
        *self.task.lock() = Some(handle);
        info!("metadata parser started");
        Ok(())
    }

    /// Cooperative stop: clear the running flag (the read loop checks it
    /// between blocks and on pipe EOF), await loop exit, then reap the
    /// subprocess.
    pub async fn stop(&self) {
        if !self.is_running() && self.task.lock().is_none() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to signal ffmpeg child");
            }
            let _ = child.wait().await;
        }
        self.buffer.clear();
        info!("metadata parser stopped");
    }
}

async fn read_loop(mut stdout: tokio::process::ChildStdout, buffer: Arc<BboxBuffer>, running: Arc<AtomicBool>) {
    let mut text_buffer = String::new();
    let mut read_buf = [0u8; 8192];

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let n = match stdout.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "metadata pipe read failed");
                break;
            }
        };
        text_buffer.push_str(&String::from_utf8_lossy(&read_buf[..n]));

        while running.load(Ordering::SeqCst) {
            let Some(end) = text_buffer.find(METADATA_STREAM_END) else {
                break;
            };
            let block: String = text_buffer.drain(..end + METADATA_STREAM_END.len()).collect();
            let events = extract_events(&block);
            buffer.enqueue(BboxFrame::new(events));
        }
    }
    running.store(false, Ordering::SeqCst);
}

/// Extract every qualifying `<tt:Object>` from one metadata block. A
/// block with no matches (malformed XML, or genuinely no objects) yields
/// an empty vector rather than an error — the caller still enqueues it.
fn extract_events(block: &str) -> Vec<BboxEvent> {
    let mut out = Vec::new();
    for caps in OBJECT_RE.captures_iter(block) {
        let object_id: i64 = caps[1].parse().unwrap_or(0);
        let left = caps[2].parse::<f64>().unwrap_or(0.0) as i64;
        let top = caps[3].parse::<f64>().unwrap_or(0.0) as i64;
        let right = caps[4].parse::<f64>().unwrap_or(0.0) as i64;
        let bottom = caps[5].parse::<f64>().unwrap_or(0.0) as i64;
        let inner = &caps[6];

        let (object_type, confidence) = match CLASS_RE.captures(inner) {
            Some(c) => (c[1].to_string(), c[2].parse::<f32>().unwrap_or(0.0)),
            None => ("Unknown".to_string(), 0.0),
        };

        out.push(BboxEvent { object_id, object_type, confidence, left, top, right, bottom });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_WITH_CLASS: &str = r#"<tt:MetadataStream>
<tt:Object ObjectId="42">
<tt:BoundingBox left="10.0" top="20.0" right="30.5" bottom="40.5"/>
<tt:ClassCandidate><tt:Type>Car</tt:Type><tt:Likelihood>0.93</tt:Likelihood></tt:ClassCandidate>
</tt:Object>
</tt:MetadataStream>"#;

    const BLOCK_WITH_DOTTED_CLASS: &str = r#"<tt:MetadataStream>
<tt:Object ObjectId="9">
<tt:BoundingBox left="1" top="2" right="3" bottom="4"/>
<tt:ClassCandidate><tt:Type>Vehicle.Car</tt:Type><tt:Likelihood>0.93</tt:Likelihood></tt:ClassCandidate>
</tt:Object>
</tt:MetadataStream>"#;

    const BLOCK_NO_CLASS: &str = r#"<tt:MetadataStream>
<tt:Object ObjectId="7">
<tt:BoundingBox left="1" top="2" right="3" bottom="4"/>
</tt:Object>
</tt:MetadataStream>"#;

    #[test]
    fn extracts_object_with_class_candidate() {
        let events = extract_events(BLOCK_WITH_CLASS);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_id, 42);
        assert_eq!(events[0].object_type, "Car");
        assert!((events[0].confidence - 0.93).abs() < 1e-6);
        assert_eq!(events[0].left, 10);
        assert_eq!(events[0].bottom, 40);
    }

    /// `CLASS_RE`'s `\w+` type token does not match across the `.` in a
    /// dotted type like "Vehicle.Car" (this mirrors the original parser's
    /// own pattern, `src/metadata_parser.cpp`); such a block degrades to
    /// the same "no class candidate" outcome as `BLOCK_NO_CLASS`.
    #[test]
    fn dotted_class_type_does_not_match_and_defaults_to_unknown() {
        let events = extract_events(BLOCK_WITH_DOTTED_CLASS);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_type, "Unknown");
        assert_eq!(events[0].confidence, 0.0);
    }

    #[test]
    fn missing_class_candidate_defaults_to_unknown() {
        let events = extract_events(BLOCK_NO_CLASS);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_type, "Unknown");
        assert_eq!(events[0].confidence, 0.0);
    }

    #[test]
    fn block_with_no_objects_yields_empty_list() {
        let events = extract_events("<tt:MetadataStream></tt:MetadataStream>");
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_block_is_skipped_silently() {
        let events = extract_events("<tt:MetadataStream><tt:Object ObjectId=\"1\">broken");
        assert!(events.is_empty());
    }

    #[test]
    fn coordinates_are_integer_truncated() {
        let events = extract_events(BLOCK_WITH_CLASS);
        assert_eq!(events[0].right, 30);
    }
}
