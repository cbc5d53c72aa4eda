//! Staged playback pipeline
//!
//! fetch (bytes) -> demux (frames) -> emit (voice). Fetch and demux run as
//! their own tasks connected by bounded channels, emit runs on the caller's
//! task because it borrows the voice connection.
//!
//! Two scopes control a run. Cancelling `source` stops fetching; whatever is
//! already buffered is still demuxed and played. Cancelling `pipeline` stops
//! every stage immediately.

use bytes::Bytes;
use futures::StreamExt;
use hiqty_core::media::ByteStream;
use hiqty_core::voice::VoiceConnection;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::DcaCodec;

/// How a single track's pipeline ended
#[derive(Debug)]
pub enum PipelineEnd {
    /// Source reached EOF and every frame was sent
    Completed,
    /// Source was cancelled; buffered frames were sent
    Stopped,
    /// Pipeline scope was cancelled mid-stream
    Aborted,
    /// Fetch or demux failed; the track cannot continue
    Failed(String),
    /// The voice connection refused a frame
    SinkFailed(String),
}

#[derive(Clone, Copy)]
enum Stage {
    Fetch,
    Demux,
}

enum StageEnd {
    Done,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub chunk_buffer: usize,
    pub frame_buffer: usize,
}

async fn fetch(
    mut source: ByteStream,
    chunks: mpsc::Sender<Bytes>,
    token: CancellationToken,
) -> StageEnd {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return StageEnd::Stopped,
            next = source.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return StageEnd::Stopped,
                    sent = chunks.send(chunk) => {
                        // demux went away; it reports why
                        if sent.is_err() {
                            return StageEnd::Done;
                        }
                    }
                }
            }
            Some(Err(e)) => return StageEnd::Failed(format!("fetch: {e}")),
            None => return StageEnd::Done,
        }
    }
}

async fn demux(
    chunks: mpsc::Receiver<Bytes>,
    frames: mpsc::Sender<Bytes>,
    token: CancellationToken,
) -> StageEnd {
    let reader = StreamReader::new(ReceiverStream::new(chunks).map(Ok::<_, std::io::Error>));
    let mut framed = FramedRead::new(reader, DcaCodec);

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return StageEnd::Stopped,
            next = framed.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return StageEnd::Stopped,
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            return StageEnd::Stopped;
                        }
                    }
                }
            }
            Some(Err(e)) => return StageEnd::Failed(format!("demux: {e}")),
            None => return StageEnd::Done,
        }
    }
}

/// Play one byte stream to `voice` until it ends or a scope is cancelled.
///
/// `source` must be a child of `pipeline`.
pub async fn run_pipeline(
    stream: ByteStream,
    voice: &mut dyn VoiceConnection,
    config: PipelineConfig,
    source: CancellationToken,
    pipeline: CancellationToken,
) -> PipelineEnd {
    let (chunk_tx, chunk_rx) = mpsc::channel(config.chunk_buffer.max(1));
    let (frame_tx, mut frame_rx) = mpsc::channel(config.frame_buffer.max(1));

    let mut stages = JoinSet::new();
    stages.spawn(async move { (Stage::Fetch, fetch(stream, chunk_tx, source).await) });
    stages.spawn({
        let pipeline = pipeline.clone();
        async move { (Stage::Demux, demux(chunk_rx, frame_tx, pipeline).await) }
    });

    if let Err(e) = voice.set_speaking(true).await {
        warn!(error = %e, "Failed to set speaking state");
    }

    let mut sink_error = None;
    let mut sent = 0usize;
    loop {
        let frame = tokio::select! {
            biased;
            () = pipeline.cancelled() => break,
            frame = frame_rx.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = voice.send_frame(frame).await {
            sink_error = Some(e.to_string());
            // unblock upstream stages
            pipeline.cancel();
            break;
        }
        sent += 1;
    }
    drop(frame_rx);

    if let Err(e) = voice.set_speaking(false).await {
        warn!(error = %e, "Failed to clear speaking state");
    }

    let mut fetch_end = StageEnd::Done;
    let mut demux_end = StageEnd::Done;
    while let Some(joined) = stages.join_next().await {
        match joined {
            Ok((Stage::Fetch, end)) => fetch_end = end,
            Ok((Stage::Demux, end)) => demux_end = end,
            Err(e) => demux_end = StageEnd::Failed(format!("stage panicked: {e}")),
        }
    }
    debug!(frames = sent, "Pipeline finished");

    if let Some(reason) = sink_error {
        return PipelineEnd::SinkFailed(reason);
    }
    if pipeline.is_cancelled() {
        return PipelineEnd::Aborted;
    }
    match (fetch_end, demux_end) {
        (StageEnd::Failed(reason), _) | (_, StageEnd::Failed(reason)) => PipelineEnd::Failed(reason),
        (StageEnd::Stopped, _) => PipelineEnd::Stopped,
        _ => PipelineEnd::Completed,
    }
}
