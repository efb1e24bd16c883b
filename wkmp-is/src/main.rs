//! Input stream inspector (wkmp-is) - Main entry point
//!
//! Streams a local file through the async-to-blocking bridge and reports what
//! a decoder would see: bytes, tags and buffer statistics. Optionally copies
//! the bytes to an output file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use wkmp_common::config::TomlConfig;
use wkmp_common::logging::init_tracing;
use wkmp_common::params::PARAMS;
use wkmp_is::source::FileSource;
use wkmp_is::{AsyncInputStream, EventLoop, InputStream, SourceError, StreamConfig, Tag};

/// Command-line arguments for wkmp-is
#[derive(Parser, Debug)]
#[command(name = "wkmp-is")]
#[command(about = "Stream a file through the WKMP input bridge")]
#[command(version)]
struct Args {
    /// File to stream
    path: PathBuf,

    /// Configuration file (defaults to $WKMP_IS_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ring buffer capacity in bytes
    #[arg(long, env = "WKMP_IS_BUFFER_SIZE")]
    buffer_size: Option<usize>,

    /// Resume the producer once the buffer drains to this many bytes
    #[arg(long, env = "WKMP_IS_RESUME_AT")]
    resume_at: Option<usize>,

    /// Seek to this byte offset before reading
    #[arg(long)]
    seek: Option<u64>,

    /// Copy streamed bytes to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Summary {
    bytes: u64,
    tags: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;
    config
        .apply_to_params(&PARAMS)
        .context("Invalid [input] configuration")?;

    let stream_config = StreamConfig::new(
        args.buffer_size.unwrap_or_else(|| PARAMS.input_buffer_size()),
        args.resume_at.unwrap_or_else(|| PARAMS.input_resume_at()),
    )
    .context("Invalid buffer sizing")?;

    info!("Starting WKMP input stream inspector");
    info!("Source: {}", args.path.display());

    let event_loop = EventLoop::start("wkmp-is-io").context("Failed to start event loop")?;
    let stream = FileSource::open(
        &args.path,
        event_loop.handle(),
        stream_config,
        PARAMS.input_chunk_size(),
    )
    .with_context(|| format!("Failed to open {}", args.path.display()))?;

    let consumer_stream = Arc::clone(&stream);
    let seek = args.seek;
    let output = args.output.clone();
    let mut consumer =
        tokio::task::spawn_blocking(move || consume(&consumer_stream, seek, output));

    let result = tokio::select! {
        joined = &mut consumer => joined.context("Consumer task panicked")?,
        _ = signal::ctrl_c() => {
            info!("Interrupted, aborting stream");
            // Wakes the consumer if it is blocked in read()
            stream.post_error(SourceError::Aborted("interrupted".into()));
            let _ = consumer.await;
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    let stats = stream.stats();
    info!(
        "Buffer: capacity={} bytes, read={} bytes, written={} bytes, resumes={}",
        stats.capacity, stats.total_read, stats.total_written, stats.resume_count
    );

    drop(stream);
    event_loop.shutdown();

    let summary = result?;
    info!(
        "Done: {} bytes read, {} tag(s) received",
        summary.bytes, summary.tags
    );
    Ok(())
}

/// Blocking consumer loop (runs on a tokio blocking thread)
fn consume(
    stream: &Arc<AsyncInputStream>,
    seek: Option<u64>,
    output: Option<PathBuf>,
) -> Result<Summary> {
    stream.wait_ready()?;
    if let Some(mime) = stream.mime_type() {
        info!("MIME type: {}", mime);
    }
    if let Some(size) = stream.size() {
        info!("Size: {} bytes", size);
    }

    if let Some(offset) = seek {
        stream
            .seek(offset)
            .with_context(|| format!("Seek to {} failed", offset))?;
        info!("Seeked to offset {}", stream.offset());
    }

    let mut writer = match output {
        Some(path) => Some(BufWriter::new(
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let mut buf = vec![0u8; PARAMS.input_chunk_size()];
    let mut summary = Summary::default();

    loop {
        if let Some(tag) = stream.read_tag()? {
            info!("Tag: {}", describe_tag(&tag));
            summary.tags += 1;
        }

        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        summary.bytes += n as u64;
        if let Some(writer) = writer.as_mut() {
            writer.write_all(&buf[..n])?;
        }
    }

    if let Some(mut writer) = writer {
        writer.flush()?;
    }
    if !stream.is_eof() {
        warn!("Consumer stopped before end of stream");
    }

    Ok(summary)
}

fn describe_tag(tag: &Tag) -> String {
    let mut parts: Vec<String> = tag
        .items
        .iter()
        .map(|item| format!("{:?}={}", item.kind, item.value))
        .collect();
    if let Some(duration) = tag.duration {
        parts.push(format!("duration={:.1}s", duration.as_secs_f64()));
    }
    parts.join(", ")
}
