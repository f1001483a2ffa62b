use std::io::Write;
use std::time::Duration;

use axum::{
    extract::Query,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use flate2::write::GzEncoder;
use flate2::Compression;
use pprof::{flamegraph::Options, protos::Message, ProfilerGuard, ProfilerGuardBuilder};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;

// Same default window as Go's net/http/pprof.
const DEFAULT_SECONDS: u64 = 30;
const MAX_SECONDS: u64 = 300;
const DEFAULT_FREQUENCY: i32 = 100;
const DEFAULT_IMAGE_WIDTH: usize = 2500;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profiler failed: {0}")]
    Profiler(#[from] pprof::Error),

    #[error("failed to encode profile: {0}")]
    Encode(String),

    #[error("failed to compress profile: {0}")]
    Compress(#[from] std::io::Error),
}

impl IntoResponse for ProfileError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "Profiling request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(CONTENT_TYPE, "text/plain")],
            self.to_string(),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileQuery {
    // seconds to run the profiler before taking snapshot
    pub seconds: Option<u64>,
    // sample frequency in Hz
    pub frequency: Option<i32>,
    // flamegraph SVG width
    pub image_width: Option<usize>,
}

impl ProfileQuery {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds.unwrap_or(DEFAULT_SECONDS).clamp(1, MAX_SECONDS))
    }

    pub fn frequency(&self) -> i32 {
        self.frequency.filter(|hz| *hz > 0).unwrap_or(DEFAULT_FREQUENCY)
    }

    pub fn image_width(&self) -> usize {
        self.image_width.unwrap_or(DEFAULT_IMAGE_WIDTH)
    }
}

pub async fn index() -> &'static str {
    "/debug/pprof/profile?seconds=N&frequency=HZ     CPU profile (gzipped pprof protobuf)\n\
     /debug/pprof/flamegraph?seconds=N&frequency=HZ  CPU flamegraph (gzipped SVG)\n"
}

// curl -sS "http://localhost:6060/debug/pprof/profile?seconds=10" > profile.pb.gz
pub async fn profile(Query(query): Query<ProfileQuery>) -> Result<Response, ProfileError> {
    let guard = sample(&query).await?;
    let profile = guard.report().build()?.pprof()?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    profile
        .write_to_writer(&mut encoder)
        .map_err(|e| ProfileError::Encode(e.to_string()))?;
    let body = encoder.finish()?;

    Ok(gzipped("application/octet-stream", body))
}

// curl -sS "http://localhost:6060/debug/pprof/flamegraph?seconds=10&image_width=2500" > flamegraph.svg.gz
pub async fn flamegraph(Query(query): Query<ProfileQuery>) -> Result<Response, ProfileError> {
    let guard = sample(&query).await?;

    let mut options = Options::default();
    options.image_width = Some(query.image_width());
    let mut svg = Vec::new();
    guard
        .report()
        .build()?
        .flamegraph_with_options(&mut svg, &mut options)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&svg)?;
    let body = encoder.finish()?;

    Ok(gzipped("image/svg+xml", body))
}

async fn sample(query: &ProfileQuery) -> Result<ProfilerGuard<'static>, ProfileError> {
    let duration = query.duration();
    let guard = ProfilerGuardBuilder::default()
        .frequency(query.frequency())
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()?;

    tracing::info!(seconds = duration.as_secs(), "Collecting CPU profile");
    sleep(duration).await;
    Ok(guard)
}

fn gzipped(content_type: &'static str, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, content_type), (axum::http::header::CONTENT_ENCODING, "gzip")],
        body,
    )
        .into_response()
}
