//! Line-buffered output readers

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

use super::types::LineCallback;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Strip the line terminator and decode lossily
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Forward every complete line of `reader` to `on_line`, touching `activity`
/// on each chunk. A trailing line without a newline is flushed at EOF.
/// Returns the number of lines delivered.
pub(crate) async fn pump_lines<R>(reader: R, on_line: LineCallback, activity: Arc<AtomicI64>) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    let mut delivered = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                activity.store(now_millis(), Ordering::Relaxed);
                on_line(&decode_line(&buf));
                delivered += 1;
            }
            Err(e) => {
                warn!(error = %e, "Output stream read failed");
                if !buf.is_empty() {
                    on_line(&decode_line(&buf));
                    delivered += 1;
                }
                break;
            }
        }
    }

    delivered
}
