//! Log writer service
//!
//! Turns a job's console output into numbered log parts and hands them to
//! the job's sink. One writer belongs to exactly one job.

use async_trait::async_trait;
use logpipe_core::domain::log::LogPart;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LogError, Result};
use crate::service::log_sink::LogPartSink;
use crate::service::silence_timer::SilenceTimer;

/// Appended to the log when the maximum log length is reached
pub const TRUNCATION_NOTICE: &str =
    "\n\nThe job exceeded the maximum log length, and has been terminated.\n\n";

/// Smallest accepted part size; fits any UTF-8 character
const MIN_PART_SIZE: usize = 4;

/// Per-job log stream
///
/// Writes become log parts with consecutive numbers. Closing produces the
/// single final part of the stream.
#[async_trait]
pub trait LogWriter: Send {
    /// Appends bytes to the log and re-arms the silence timeout
    ///
    /// Returns the number of bytes accepted. Fewer than `buf.len()` are
    /// accepted only when the maximum log length is reached; the writer then
    /// appends the truncation notice and closes itself.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Writes `buf`, then closes the writer
    async fn write_and_close(&mut self, buf: &[u8]) -> Result<usize>;

    /// Emits the final part; a no-op on an already closed writer
    async fn close(&mut self) -> Result<()>;

    /// Sets the allowed silence between writes and re-arms the timer
    fn set_timeout(&mut self, timeout: Duration);

    /// Flag that turns `true` when the silence timeout elapses
    fn timeout(&self) -> watch::Receiver<bool>;

    /// Sets the maximum number of bytes accepted over the writer's lifetime
    fn set_max_log_length(&mut self, limit: usize);

    /// Whether the log was cut at the maximum length
    fn is_truncated(&self) -> bool;

    /// Unresolved delivery failure for this job's parts, if any
    fn delivery_error(&self) -> Option<LogError>;
}

/// Limits applied to a new writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub silence_timeout: Duration,
    pub max_log_length: usize,
    /// Maximum content bytes per log part
    pub max_part_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(600),
            max_log_length: 4_500_000,
            max_part_size: 8192,
        }
    }
}

/// LogWriter that feeds a shared `LogPartSink`
pub struct SinkLogWriter {
    job_id: u64,
    sink: Option<Arc<LogPartSink>>,
    /// Kept after close so delivery failures stay observable
    status: Weak<LogPartSink>,
    ctx: CancellationToken,
    timer: SilenceTimer,
    next_number: u64,
    bytes_written: usize,
    max_log_length: usize,
    max_part_size: usize,
    /// Incomplete UTF-8 sequence carried over to the next write
    pending: Vec<u8>,
    truncated: bool,
    closed: bool,
}

impl SinkLogWriter {
    /// Creates a writer for a job and arms its silence timer
    ///
    /// # Arguments
    /// * `job_id` - The owning job
    /// * `sink` - Sink for the job's destination URL
    /// * `options` - Timeout and length limits
    /// * `ctx` - The job's cancellation token
    pub fn new(
        job_id: u64,
        sink: Arc<LogPartSink>,
        options: WriterOptions,
        ctx: CancellationToken,
    ) -> Self {
        let timer = SilenceTimer::start(options.silence_timeout, &ctx);

        Self {
            job_id,
            status: Arc::downgrade(&sink),
            sink: Some(sink),
            ctx,
            timer,
            next_number: 0,
            bytes_written: 0,
            max_log_length: options.max_log_length,
            max_part_size: options.max_part_size.max(MIN_PART_SIZE),
            pending: Vec::new(),
            truncated: false,
            closed: false,
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Adds `text` as parts, counting the bytes that reached the sink
    async fn submit(&mut self, text: &str, sent: &mut usize) -> Result<()> {
        let Some(sink) = self.sink.clone() else {
            return Err(LogError::Closed);
        };

        for chunk in split_parts(text, self.max_part_size) {
            let part = LogPart::new(self.job_id, self.next_number, chunk);
            sink.add(&self.ctx, part).await?;
            self.next_number += 1;
            *sent += chunk.len();
        }

        Ok(())
    }

    async fn finish(&mut self, content: String) -> Result<()> {
        self.closed = true;
        self.timer.disarm();

        let Some(sink) = self.sink.take() else {
            return Ok(());
        };

        // The final part must get through even if the job was cancelled.
        let part = LogPart::final_part(self.job_id, self.next_number, content);
        if let Err(e) = sink.add(&CancellationToken::new(), part).await {
            warn!(
                "Final log part {} of job {} was lost: {}",
                self.next_number, self.job_id, e
            );
            return Err(e);
        }
        self.next_number += 1;

        debug!(
            "Closed log for job {} after {} part(s), {} byte(s)",
            self.job_id, self.next_number, self.bytes_written
        );
        Ok(())
    }
}

#[async_trait]
impl LogWriter for SinkLogWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(LogError::Closed);
        }
        if self.ctx.is_cancelled() {
            return Err(LogError::Cancelled);
        }

        self.timer.rearm();

        let remaining = self.max_log_length.saturating_sub(self.bytes_written);
        let accepted = buf.len().min(remaining);

        if accepted > 0 {
            let text = decode_utf8(&mut self.pending, &buf[..accepted]);
            let mut sent = 0;
            let submitted = self.submit(&text, &mut sent).await;
            // An interrupted write only counts the parts that reached the sink.
            self.bytes_written += match submitted {
                Ok(()) => accepted,
                Err(_) => sent.min(accepted),
            };
            submitted?;
        }

        if accepted < buf.len() {
            warn!(
                "Log for job {} exceeded {} bytes, truncating",
                self.job_id, self.max_log_length
            );
            self.truncated = true;
            let mut content = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            content.push_str(TRUNCATION_NOTICE);
            self.finish(content).await?;
        }

        Ok(accepted)
    }

    async fn write_and_close(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.write(buf).await?;
        self.close().await?;
        Ok(written)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let content = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.finish(content).await
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timer.set_timeout(timeout);
    }

    fn timeout(&self) -> watch::Receiver<bool> {
        self.timer.subscribe()
    }

    fn set_max_log_length(&mut self, limit: usize) {
        self.max_log_length = limit;
    }

    fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn delivery_error(&self) -> Option<LogError> {
        self.status
            .upgrade()
            .and_then(|sink| sink.delivery_error(self.job_id))
    }
}

/// Decodes `bytes` after whatever is left in `pending`
///
/// Invalid sequences become U+FFFD. An incomplete sequence at the very end
/// stays in `pending` for the next call.
fn decode_utf8(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    let mut buffered = std::mem::take(pending);
    buffered.extend_from_slice(bytes);

    let mut text = String::with_capacity(buffered.len());
    let mut input = &buffered[..];

    loop {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, rest) = input.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        input = &rest[len..];
                    }
                    None => {
                        pending.extend_from_slice(rest);
                        break;
                    }
                }
            }
        }
    }

    text
}

/// Splits text into chunks of at most `max` bytes on character boundaries
fn split_parts(text: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max {
            parts.push(rest);
            break;
        }
        let mut end = max;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        parts.push(head);
        rest = tail;
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::RecordingRepository;
    use crate::service::log_sink::{RetryPolicy, SinkOptions};
    use tokio::time;

    const URL: &str = "http://example.org/log-parts/multi";

    fn sink_with(repo: &Arc<RecordingRepository>, max_attempts: u32) -> Arc<LogPartSink> {
        LogPartSink::spawn(
            URL,
            1000,
            SinkOptions {
                flush_interval: Duration::from_secs(3600),
                retry: RetryPolicy {
                    max_attempts,
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(1),
                },
            },
            repo.clone(),
            CancellationToken::new(),
        )
    }

    fn writer(sink: &Arc<LogPartSink>, options: WriterOptions) -> SinkLogWriter {
        SinkLogWriter::new(7, Arc::clone(sink), options, CancellationToken::new())
    }

    async fn delivered(sink: &LogPartSink, repo: &RecordingRepository) -> Vec<LogPart> {
        sink.flush(&CancellationToken::new()).await.unwrap();
        repo.parts_for(7)
    }

    #[test]
    fn test_decode_keeps_incomplete_tail() {
        let mut pending = Vec::new();

        assert_eq!(decode_utf8(&mut pending, b"caf\xC3"), "caf");
        assert_eq!(pending, vec![0xC3]);

        assert_eq!(decode_utf8(&mut pending, b"\xA9!"), "é!");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_replaces_invalid_bytes() {
        let mut pending = Vec::new();
        assert_eq!(decode_utf8(&mut pending, b"a\xFFb"), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_split_parts_respects_char_boundaries() {
        assert_eq!(split_parts("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(split_parts("ééé", 4), vec!["éé", "é"]);
        assert!(split_parts("", 4).is_empty());
    }

    #[tokio::test]
    async fn test_writes_become_numbered_parts() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        assert_eq!(writer.write(b"hello\n").await.unwrap(), 6);
        assert_eq!(writer.write(b"world\n").await.unwrap(), 6);
        writer.close().await.unwrap();

        assert_eq!(
            delivered(&sink, &repo).await,
            vec![
                LogPart::new(7, 0, "hello\n"),
                LogPart::new(7, 1, "world\n"),
                LogPart::final_part(7, 2, ""),
            ]
        );
    }

    #[tokio::test]
    async fn test_large_write_is_split_into_parts() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(
            &sink,
            WriterOptions {
                max_part_size: 4,
                ..WriterOptions::default()
            },
        );

        writer.write_and_close(b"abcdefghij").await.unwrap();

        let contents: Vec<String> = delivered(&sink, &repo)
            .await
            .into_iter()
            .map(|part| part.content)
            .collect();
        assert_eq!(contents, vec!["abcd", "efgh", "ij", ""]);
    }

    #[tokio::test]
    async fn test_close_twice_produces_one_final_part() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        writer.write(b"done\n").await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let parts = delivered(&sink, &repo).await;
        assert_eq!(parts.iter().filter(|part| part.is_final).count(), 1);
        assert_eq!(parts.len(), 2);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        writer.close().await.unwrap();

        assert_eq!(writer.write(b"late").await, Err(LogError::Closed));
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_write_and_close_finalizes_once() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        assert_eq!(writer.write_and_close(b"bye\n").await.unwrap(), 4);
        writer.close().await.unwrap();

        assert_eq!(
            delivered(&sink, &repo).await,
            vec![LogPart::new(7, 0, "bye\n"), LogPart::final_part(7, 1, "")]
        );
    }

    #[tokio::test]
    async fn test_max_log_length_truncates_and_marks() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());
        writer.set_max_log_length(10);

        assert_eq!(writer.write(b"0123456").await.unwrap(), 7);
        assert_eq!(writer.write(b"789abcde").await.unwrap(), 3);

        assert!(writer.is_truncated());
        assert!(writer.is_closed());
        assert_eq!(writer.write(b"more").await, Err(LogError::Closed));
        writer.close().await.unwrap();

        assert_eq!(
            delivered(&sink, &repo).await,
            vec![
                LogPart::new(7, 0, "0123456"),
                LogPart::new(7, 1, "789"),
                LogPart::final_part(7, 2, TRUNCATION_NOTICE),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_past_exact_limit_truncates() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(
            &sink,
            WriterOptions {
                max_log_length: 4,
                ..WriterOptions::default()
            },
        );

        assert_eq!(writer.write(b"abcd").await.unwrap(), 4);
        assert!(!writer.is_truncated());
        assert_eq!(writer.write(b"e").await.unwrap(), 0);
        assert!(writer.is_truncated());

        let parts = delivered(&sink, &repo).await;
        assert_eq!(parts.last(), Some(&LogPart::final_part(7, 1, TRUNCATION_NOTICE)));
    }

    #[tokio::test]
    async fn test_split_character_across_writes() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        writer.write(b"\xC3").await.unwrap();
        writer.write(b"\xA9\n").await.unwrap();
        writer.write(b"\xE2\x82").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(
            delivered(&sink, &repo).await,
            vec![
                LogPart::new(7, 0, "é\n"),
                LogPart::final_part(7, 1, "\u{FFFD}"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_timeout_rearms_on_write() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(
            &sink,
            WriterOptions {
                silence_timeout: Duration::from_secs(10),
                ..WriterOptions::default()
            },
        );
        let mut timeout = writer.timeout();

        time::sleep(Duration::from_secs(5)).await;
        writer.write(b"tick\n").await.unwrap();
        time::sleep(Duration::from_secs(7)).await;
        assert!(!*timeout.borrow());

        time::timeout(Duration::from_secs(4), timeout.wait_for(|fired| *fired))
            .await
            .unwrap()
            .unwrap();

        writer.write(b"tock\n").await.unwrap();
        assert!(!*writer.timeout().borrow());
    }

    #[tokio::test]
    async fn test_cancelled_job_still_closes() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let ctx = CancellationToken::new();
        let mut writer = SinkLogWriter::new(7, Arc::clone(&sink), WriterOptions::default(), ctx.clone());

        writer.write(b"partial").await.unwrap();
        ctx.cancel();

        assert_eq!(writer.write(b"more").await, Err(LogError::Cancelled));
        writer.close().await.unwrap();

        assert_eq!(
            delivered(&sink, &repo).await,
            vec![LogPart::new(7, 0, "partial"), LogPart::final_part(7, 1, "")]
        );
    }

    #[tokio::test]
    async fn test_delivery_error_is_visible_to_the_job() {
        let repo = RecordingRepository::failing(1);
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        writer.write_and_close(b"lost?\n").await.unwrap();
        assert!(sink.flush(&CancellationToken::new()).await.is_err());

        assert!(matches!(
            writer.delivery_error(),
            Some(LogError::Delivery { attempts: 1, .. })
        ));

        sink.flush(&CancellationToken::new()).await.unwrap();
        assert!(writer.delivery_error().is_none());
        assert_eq!(repo.parts_for(7).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_write_counts_only_added_parts() {
        let repo = RecordingRepository::hanging();
        let sink = LogPartSink::spawn(
            URL,
            1,
            SinkOptions::default(),
            repo.clone(),
            CancellationToken::new(),
        );
        let ctx = CancellationToken::new();
        let options = WriterOptions {
            max_part_size: 4,
            ..WriterOptions::default()
        };
        let mut writer = SinkLogWriter::new(7, Arc::clone(&sink), options, ctx.clone());

        // The first part is stuck in flight, so the second one waits for room.
        let canceller = ctx.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        assert_eq!(writer.write(b"aaaabbbbcccc").await, Err(LogError::Cancelled));
        assert_eq!(writer.bytes_written, 4);
        assert_eq!(writer.next_number, 1);
    }

    #[tokio::test]
    async fn test_close_on_closed_sink_reports_lost_final_part() {
        let repo = RecordingRepository::new();
        let sink = sink_with(&repo, 1);
        let mut writer = writer(&sink, WriterOptions::default());

        writer.write(b"early\n").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(writer.close().await, Err(LogError::Cancelled));
        assert!(writer.is_closed());
        assert_eq!(writer.write(b"late").await, Err(LogError::Closed));
        assert_eq!(repo.parts_for(7), vec![LogPart::new(7, 0, "early\n")]);
    }
}
