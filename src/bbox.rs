//! Bbox buffer and pusher: a time-delayed FIFO queue of detection frames
//! fed by the metadata parser, drained by one polling task per connection
//! so that bounding boxes reach the client in phase with the re-muxed
//! video.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::codec::encode_frame;
use crate::error::Result;

const MAX_FRAME_AGE: Duration = Duration::from_secs(10);
const MAX_BUFFER_LEN: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct BboxEvent {
    pub object_id: i64,
    #[serde(rename = "type")]
    pub object_type: String,
    pub confidence: f32,
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

/// One complete metadata block's worth of detections, possibly empty.
#[derive(Debug, Clone)]
pub struct BboxFrame {
    pub enqueued_at: Instant,
    pub events: Vec<BboxEvent>,
}

impl BboxFrame {
    pub fn new(events: Vec<BboxEvent>) -> Self {
        BboxFrame { enqueued_at: Instant::now(), events }
    }

    fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// FIFO queue shared between the metadata parser (producer) and the
/// per-connection pushers (consumers). A frame dequeued by one pusher is
/// no longer available to another: in a multi-connection deployment each
/// connected pusher observes a disjoint subset of frames, matching the
/// source's per-connection dequeue discipline (see design notes on
/// multi-subscriber delivery).
pub struct BboxBuffer {
    queue: Mutex<VecDeque<BboxFrame>>,
}

impl BboxBuffer {
    pub fn new() -> Self {
        BboxBuffer { queue: Mutex::new(VecDeque::new()) }
    }

    /// Append `frame`, then trim from the head: drop anything older than
    /// 10 seconds, then drop down to the 50 most recent frames.
    pub fn enqueue(&self, frame: BboxFrame) {
        let mut queue = self.queue.lock();
        queue.push_back(frame);
        while let Some(front) = queue.front() {
            if front.age() > MAX_FRAME_AGE {
                queue.pop_front();
            } else {
                break;
            }
        }
        while queue.len() > MAX_BUFFER_LEN {
            queue.pop_front();
        }
    }

    /// If the head is at least `min_age` old, dequeue and return it along
    /// with the buffer length after removal. Otherwise leave the buffer
    /// untouched.
    pub fn try_dequeue(&self, min_age: Duration) -> Option<(BboxFrame, usize)> {
        let mut queue = self.queue.lock();
        if queue.front().map(|f| f.age() >= min_age).unwrap_or(false) {
            let frame = queue.pop_front().unwrap();
            Some((frame, queue.len()))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl Default for BboxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct WireBbox {
    id: i64,
    #[serde(rename = "type")]
    object_type: String,
    confidence: f32,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

impl From<&BboxEvent> for WireBbox {
    fn from(e: &BboxEvent) -> Self {
        WireBbox {
            id: e.object_id,
            object_type: e.object_type.clone(),
            confidence: e.confidence,
            x: e.left,
            y: e.top,
            width: e.right - e.left,
            height: e.bottom - e.top,
        }
    }
}

#[derive(Serialize)]
struct BufferInfo {
    buffer_size: usize,
    processed_count: u64,
}

#[derive(Serialize)]
struct PushMessage {
    response_id: u32,
    bboxes: Vec<WireBbox>,
    buffer_info: BufferInfo,
}

/// Build the length-prefixed wire frame for one delivered `BboxFrame`.
fn encode_push(frame: &BboxFrame, buffer_size: usize, processed_count: u64) -> Vec<u8> {
    let msg = PushMessage {
        response_id: 200,
        bboxes: frame.events.iter().map(WireBbox::from).collect(),
        buffer_info: BufferInfo { buffer_size, processed_count },
    };
    let json = serde_json::to_vec(&msg).expect("bbox push message always serializes");
    encode_frame(&json)
}

/// Cooperative stop flag shared between a connection's dispatch loop and
/// its pusher task.
#[derive(Clone)]
pub struct PusherHandle {
    stop: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
}

impl PusherHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// Spawn the per-connection push worker: at each `send_interval` tick,
/// dequeue exactly one frame if its age is at least `buffer_delay` and
/// write it through `write_half` under `write_lock`. Exits (without
/// panicking) on write failure or when `stop()` is called on the returned
/// handle, checked at the next tick boundary.
pub fn spawn_pusher<W>(
    buffer: Arc<BboxBuffer>,
    write_half: Arc<tokio::sync::Mutex<W>>,
    buffer_delay: Duration,
    send_interval: Duration,
) -> (tokio::task::JoinHandle<()>, PusherHandle)
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let handle = PusherHandle {
        stop: Arc::new(AtomicBool::new(false)),
        processed: Arc::new(AtomicU64::new(0)),
    };
    let task_handle = handle.clone();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(send_interval);
        loop {
            ticker.tick().await;
            if task_handle.stop.load(Ordering::SeqCst) {
                break;
            }
            let Some((frame, remaining)) = buffer.try_dequeue(buffer_delay) else {
                continue;
            };
            let processed = task_handle.processed.fetch_add(1, Ordering::Relaxed) + 1;
            let bytes = encode_push(&frame, remaining, processed);

            let mut guard = write_half.lock().await;
            if guard.write_all(&bytes).await.is_err() {
                break;
            }
            if guard.flush().await.is_err() {
                break;
            }
        }
    });

    (join, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn event(id: i64) -> BboxEvent {
        BboxEvent { object_id: id, object_type: "Unknown".into(), confidence: 0.0, left: 1, top: 2, right: 11, bottom: 22 }
    }

    #[test]
    fn enqueue_then_dequeue_respects_order() {
        let buf = BboxBuffer::new();
        buf.enqueue(BboxFrame::new(vec![event(1)]));
        buf.enqueue(BboxFrame::new(vec![event(2)]));

        let (first, _) = buf.try_dequeue(Duration::ZERO).unwrap();
        assert_eq!(first.events[0].object_id, 1);
        let (second, _) = buf.try_dequeue(Duration::ZERO).unwrap();
        assert_eq!(second.events[0].object_id, 2);
    }

    #[test]
    fn dequeue_withholds_frame_younger_than_min_age() {
        let buf = BboxBuffer::new();
        buf.enqueue(BboxFrame::new(vec![]));
        assert!(buf.try_dequeue(Duration::from_secs(60)).is_none());
        assert!(buf.try_dequeue(Duration::ZERO).is_some());
    }

    #[test]
    fn buffer_caps_at_fifty_frames() {
        let buf = BboxBuffer::new();
        for i in 0..60 {
            buf.enqueue(BboxFrame::new(vec![event(i)]));
        }
        assert_eq!(buf.len(), 50);
    }

    #[test]
    fn buffer_drops_frames_older_than_ten_seconds_on_enqueue() {
        let buf = BboxBuffer::new();
        {
            let mut queue = buf.queue.lock();
            queue.push_back(BboxFrame {
                enqueued_at: Instant::now() - StdDuration::from_secs(11),
                events: vec![],
            });
        }
        buf.enqueue(BboxFrame::new(vec![event(1)]));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn clear_empties_buffer() {
        let buf = BboxBuffer::new();
        buf.enqueue(BboxFrame::new(vec![]));
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_metadata_block_still_enqueues_a_frame() {
        let buf = BboxBuffer::new();
        buf.enqueue(BboxFrame::new(vec![]));
        assert_eq!(buf.len(), 1);
    }

    #[tokio::test]
    async fn pusher_delivers_one_frame_per_ready_tick() {
        let buffer = Arc::new(BboxBuffer::new());
        buffer.enqueue(BboxFrame::new(vec![event(7)]));

        let (client, server) = tokio::io::duplex(4096);
        let write_half = Arc::new(tokio::sync::Mutex::new(server));
        let (join, handle) = spawn_pusher(buffer, write_half, Duration::ZERO, Duration::from_millis(10));

        let mut reader = tokio::io::BufReader::new(client);
        let mut len_buf = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut reader, &mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        tokio::io::AsyncReadExt::read_exact(&mut reader, &mut payload).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["response_id"], 200);
        assert_eq!(value["bboxes"][0]["id"], 7);

        handle.stop();
        join.await.unwrap();
    }
}
