#![forbid(unsafe_code)]

//! Axum backend that fronts the resolver binary. It translates catalog
//! quality labels into format selectors, resolves watch pages into direct
//! media URLs, relays media bytes with Range support, and transcodes the
//! best audio stream into a tagged MP3 on the fly.

use std::{
    io,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use anyhow::{Context, Result, anyhow, bail};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{Stream, TryStreamExt};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::{
    process::{Child, ChildStdout, Command},
    signal,
};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::cors::{Any, CorsLayer};
use tubelink::catalog::{BEST_SELECTOR, QualityLabel, label_list};
use tubelink::config::{RuntimeOverrides, resolve_runtime_settings};
use tubelink::probe::{
    FormatDescriptor, HeatmapPoint, OneOrMany, ThumbnailInfo, VideoProbe, available_qualities,
    best_audio_stream, best_thumbnail,
};
use tubelink::resolver::{Resolver, ensure_program_available, find_resolver_binary};
use tubelink::security::ensure_not_root;

/// Upstream bodies are re-chunked into frames of this size so the relay
/// never buffers a whole payload.
const PROXY_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct ServerArgs {
    listen_host: IpAddr,
    port: u16,
    resolver_bin: Option<PathBuf>,
    cookies_file: PathBuf,
    ffmpeg_bin: PathBuf,
    jobs: usize,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut host_override: Option<IpAddr> = None;
        let mut port_override: Option<u16> = None;
        let mut resolver_override: Option<PathBuf> = None;
        let mut cookies_override: Option<PathBuf> = None;
        let mut ffmpeg_override: Option<PathBuf> = None;
        let mut jobs_override: Option<usize> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--resolver=") {
                resolver_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--cookies=") {
                cookies_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--ffmpeg=") {
                ffmpeg_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--jobs=") {
                jobs_override = Some(parse_jobs_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--resolver" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--resolver requires a value"))?;
                    resolver_override = Some(PathBuf::from(value));
                }
                "--cookies" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--cookies requires a value"))?;
                    cookies_override = Some(PathBuf::from(value));
                }
                "--ffmpeg" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--ffmpeg requires a value"))?;
                    ffmpeg_override = Some(PathBuf::from(value));
                }
                "--jobs" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--jobs requires a value"))?;
                    jobs_override = Some(parse_jobs_arg(&value)?);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(RuntimeOverrides {
            port: port_override,
            resolver_bin: resolver_override,
            cookies_file: cookies_override,
            ffmpeg_bin: ffmpeg_override,
            jobs: jobs_override,
            ..RuntimeOverrides::default()
        })?;
        let listen_host = match host_override {
            Some(host) => host,
            None => parse_host_arg(&settings.host)?,
        };

        Ok(Self {
            listen_host,
            port: settings.port,
            resolver_bin: settings.resolver_bin,
            cookies_file: settings.cookies_file,
            ffmpeg_bin: settings.ffmpeg_bin,
            jobs: settings.jobs,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBELINK_HOST")
}

fn parse_jobs_arg(value: &str) -> Result<usize> {
    let jobs = value
        .parse::<usize>()
        .context("expected a numeric limit for concurrent resolver runs")?;
    if jobs == 0 {
        bail!("--jobs must be at least 1");
    }
    Ok(jobs)
}

/// Shared state handed to every request handler.
#[derive(Clone)]
struct AppState {
    resolver: Resolver,
    http: reqwest::Client,
    transcoder: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates a 400 error with the provided message.
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates a 404 error with the provided message.
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Creates a 500 error with the provided message.
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Creates a 502 error with the provided message.
    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    url: String,
    quality: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    input_url: String,
    quality: String,
    media_url: String,
    media_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FormatsRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct FormatsResponse {
    input_url: String,
    available_qualities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyParams {
    url: String,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllLinksRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Mp3Request {
    url: String,
    /// Suggested download filename, without the `.mp3` extension.
    filename: Option<String>,
}

/// Full structural dump for one video: every format stream and thumbnail
/// variant the probe discovered, plus page metadata and summary counts.
#[derive(Debug, Serialize)]
struct AllLinksResponse {
    video_id: String,
    title: String,
    alt_title: Option<String>,
    webpage_url: String,
    original_url: String,
    extractor: String,
    channel: Option<String>,
    channel_id: Option<String>,
    channel_url: Option<String>,
    channel_follower_count: Option<i64>,
    uploader: Option<String>,
    artists: Option<Vec<String>>,
    creators: Option<Vec<String>>,
    description: Option<String>,
    categories: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    album: Option<String>,
    track: Option<String>,
    view_count: Option<i64>,
    like_count: Option<i64>,
    comment_count: Option<i64>,
    age_limit: Option<i64>,
    availability: Option<String>,
    duration: Option<i64>,
    duration_string: Option<String>,
    upload_date: Option<String>,
    release_date: Option<String>,
    release_year: Option<i64>,
    timestamp: Option<i64>,
    thumbnail: Option<String>,
    is_live: Option<bool>,
    was_live: Option<bool>,
    live_status: Option<String>,
    media_type: Option<String>,
    playable_in_embed: Option<bool>,
    heatmap: Option<Vec<HeatmapPoint>>,
    formats: Vec<FormatDescriptor>,
    thumbnails: Vec<ThumbnailInfo>,
    total_format_links: usize,
    total_thumbnail_links: usize,
    total_links: usize,
}

impl AllLinksResponse {
    fn from_probe(request_url: &str, probe: VideoProbe) -> Self {
        let formats = probe.formats.unwrap_or_default();
        let thumbnails = probe.thumbnails.unwrap_or_default();
        let total_format_links = formats.len();
        let total_thumbnail_links = thumbnails.len();

        Self {
            video_id: probe.id.unwrap_or_default(),
            title: probe.title.unwrap_or_default(),
            alt_title: probe.alt_title,
            webpage_url: probe.webpage_url.unwrap_or_else(|| request_url.to_owned()),
            original_url: probe.original_url.unwrap_or_else(|| request_url.to_owned()),
            extractor: probe.extractor.unwrap_or_default(),
            channel: first_scalar(probe.channel),
            channel_id: first_scalar(probe.channel_id),
            channel_url: first_scalar(probe.channel_url),
            channel_follower_count: probe.channel_follower_count,
            uploader: probe.uploader,
            artists: probe.artists,
            creators: probe.creators,
            description: probe.description,
            categories: probe.categories,
            tags: probe.tags,
            album: probe.album,
            track: probe.track,
            view_count: probe.view_count,
            like_count: probe.like_count,
            comment_count: probe.comment_count,
            age_limit: probe.age_limit,
            availability: probe.availability,
            duration: probe.duration,
            duration_string: probe.duration_string,
            upload_date: probe.upload_date,
            release_date: probe.release_date,
            release_year: probe.release_year,
            timestamp: probe.timestamp,
            thumbnail: probe.thumbnail,
            is_live: probe.is_live,
            was_live: probe.was_live,
            live_status: probe.live_status,
            media_type: probe.media_type,
            playable_in_embed: probe.playable_in_embed,
            heatmap: probe.heatmap,
            formats,
            thumbnails,
            total_format_links,
            total_thumbnail_links,
            total_links: total_format_links + total_thumbnail_links,
        }
    }
}

/// Some sites report channel fields as a list; the response keeps the first.
fn first_scalar(value: Option<OneOrMany<String>>) -> Option<String> {
    value.and_then(|value| value.first().cloned())
}

#[tokio::main]
async fn main() -> Result<()> {
    let ServerArgs {
        listen_host,
        port,
        resolver_bin,
        cookies_file,
        ffmpeg_bin,
        jobs,
    } = ServerArgs::parse()?;

    ensure_not_root("backend")?;

    let resolver_binary = find_resolver_binary(resolver_bin.as_deref())?;
    println!("Using resolver binary {}", resolver_binary.display());
    if let Err(err) = ensure_program_available(&ffmpeg_bin) {
        eprintln!(
            "  Warning: transcoding is unavailable until {} works: {:#}",
            ffmpeg_bin.display(),
            err
        );
    }

    let state = AppState {
        resolver: Resolver::new(resolver_binary, Some(cookies_file), jobs),
        http: reqwest::Client::builder()
            .build()
            .context("building HTTP client")?,
        transcoder: Arc::new(ffmpeg_bin),
    };
    println!("Cookie sources: {}", state.resolver.describe_cookie_chain());

    // The CORS layer wraps every route and the fallback, so even error
    // responses stay consumable from browser contexts.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/resolve", post(resolve_media))
        .route("/formats", post(list_formats))
        .route("/proxy", get(proxy_media))
        .route("/alllinks", post(all_links))
        .route("/mp3", post(transcode_mp3))
        .fallback(unknown_endpoint)
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // We do not propagate this error up because it only affects graceful
    // shutdown; the process still terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn unknown_endpoint() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn resolve_media(
    State(state): State<AppState>,
    Json(payload): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveResponse>> {
    let (quality, selector) = match payload.quality.as_deref() {
        Some(raw) => {
            let label = QualityLabel::parse(raw).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "unknown quality {raw:?}; valid values are: {}",
                    label_list()
                ))
            })?;
            (label.as_str(), label.selector())
        }
        None => ("best", BEST_SELECTOR),
    };

    let media_urls = state
        .resolver
        .resolve(&payload.url, selector)
        .await
        .map_err(resolver_error)?;
    // The first URL is authoritative; later lines would be separate component
    // streams that the caller cannot play without muxing.
    let Some(media_url) = media_urls.first().cloned() else {
        return Err(ApiError::bad_gateway(
            "the resolver did not return any direct media URLs",
        ));
    };

    Ok(Json(ResolveResponse {
        input_url: payload.url,
        quality: quality.to_owned(),
        media_url,
        media_urls,
    }))
}

async fn list_formats(
    State(state): State<AppState>,
    Json(payload): Json<FormatsRequest>,
) -> ApiResult<Json<FormatsResponse>> {
    let probe = state
        .resolver
        .probe(&payload.url)
        .await
        .map_err(resolver_error)?;
    let labels = available_qualities(probe.formats.as_deref().unwrap_or_default())
        .into_iter()
        .map(|label| label.as_str().to_owned())
        .collect();

    Ok(Json(FormatsResponse {
        input_url: payload.url,
        available_qualities: labels,
    }))
}

async fn all_links(
    State(state): State<AppState>,
    Json(payload): Json<AllLinksRequest>,
) -> ApiResult<Json<AllLinksResponse>> {
    let probe = state
        .resolver
        .probe(&payload.url)
        .await
        .map_err(resolver_error)?;
    Ok(Json(AllLinksResponse::from_probe(&payload.url, probe)))
}

/// Relays one upstream resource to the caller. The upstream connection is
/// opened before the response starts so length and range headers can be
/// mirrored, and an inbound `Range` header is forwarded verbatim.
async fn proxy_media(
    State(state): State<AppState>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if !is_proxyable_url(&params.url) {
        return Err(ApiError::bad_request(
            "only http:// and https:// URLs can be proxied",
        ));
    }

    let mut request = state.http.get(&params.url);
    if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE, range.clone());
    }
    let upstream = request
        .send()
        .await
        .map_err(|err| ApiError::bad_gateway(format!("fetching upstream media: {err}")))?;

    let mut builder = Response::builder().status(upstream.status());
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    if upstream.headers().get(header::CONTENT_TYPE).is_none() {
        let bare_url = params.url.split(['?', '#']).next().unwrap_or(&params.url);
        let guess_source = params.filename.as_deref().unwrap_or(bare_url);
        let mime = MimeGuess::from_path(guess_source).first_or_octet_stream();
        builder = builder.header(header::CONTENT_TYPE, mime.as_ref());
    }
    if let Some(filename) = &params.filename {
        builder = builder.header(header::CONTENT_DISPOSITION, content_disposition_value(filename));
    }

    let reader = StreamReader::new(upstream.bytes_stream().map_err(io::Error::other));
    let stream = ReaderStream::with_capacity(reader, PROXY_CHUNK_SIZE);
    builder
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::internal(format!("building response: {err}")))
}

/// Probes the page, picks the best audio-only stream, and pipes it through
/// the transcoder to MP3 with cover art and ID3 tags. The body streams the
/// transcoder's stdout, so no `Content-Length` is known ahead of time.
async fn transcode_mp3(
    State(state): State<AppState>,
    Json(payload): Json<Mp3Request>,
) -> ApiResult<Response> {
    let probe = state
        .resolver
        .probe(&payload.url)
        .await
        .map_err(resolver_error)?;
    let audio_url = best_audio_stream(probe.formats.as_deref().unwrap_or_default())
        .and_then(|stream| stream.url.clone())
        .ok_or_else(|| {
            ApiError::bad_gateway("no directly fetchable audio-only stream is available")
        })?;

    let cover = fetch_cover_art(&state.http, &probe).await;
    let tags = mp3_tags(&probe);
    let args = transcoder_args(&audio_url, cover.as_ref().map(|file| file.path()), &tags);

    let mut child = Command::new(state.transcoder.as_path())
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ApiError::internal(format!("starting transcoder: {err}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::internal("transcoder stdout was not captured"))?;

    let download_name = payload
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(sanitize_filename)
        .unwrap_or_else(|| default_mp3_name(&probe));
    let disposition = content_disposition_value(&format!("{download_name}.mp3"));

    let stream = Mp3Stream {
        stdout: ReaderStream::new(stdout),
        child: Some(child),
        _cover: cover,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::internal(format!("building response: {err}")))
}

/// Response body for `/mp3`. Owns the transcoder process and the cover art
/// temp file, so dropping the stream (client disconnect included) kills the
/// transcoder and deletes the temp file.
struct Mp3Stream {
    stdout: ReaderStream<ChildStdout>,
    child: Option<Child>,
    _cover: Option<NamedTempFile>,
}

impl Stream for Mp3Stream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stdout).poll_next(cx)
    }
}

impl Drop for Mp3Stream {
    fn drop(&mut self) {
        // kill_on_drop takes the process down and the runtime reaps it; this
        // only reports an encoder that already failed before teardown.
        if let Some(mut child) = self.child.take()
            && let Ok(Some(status)) = child.try_wait()
            && !status.success()
        {
            eprintln!("  Warning: transcoder exited with {status}");
        }
    }
}

/// Maps resolver failures onto HTTP statuses: a missing binary is a
/// deployment problem (500), everything else is reported as rejected input
/// with the resolver's own cleaned-up message (400).
fn resolver_error(err: anyhow::Error) -> ApiError {
    let missing_binary = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|cause| cause.kind() == io::ErrorKind::NotFound);
    if missing_binary {
        return ApiError::internal("resolver binary not found; set RESOLVER_BIN or install it");
    }
    ApiError::bad_request(format!("{err:#}"))
}

/// Only plain HTTP(S) URLs may be relayed; anything else is rejected before
/// a connection is opened.
fn is_proxyable_url(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Replaces path separators and header-breaking characters so a caller
/// supplied name cannot smuggle a path or a header boundary.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '"' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Builds a `Content-Disposition` attachment value. Plain ASCII names are
/// quoted directly; anything else also gets the RFC 5987 `filename*`
/// parameter so browsers restore the original characters.
fn content_disposition_value(filename: &str) -> String {
    let sanitized = sanitize_filename(filename);
    if sanitized.is_ascii() {
        return format!("attachment; filename=\"{sanitized}\"");
    }
    let fallback: String = sanitized
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        percent_encode(&sanitized)
    )
}

/// Percent-encodes every byte outside the unreserved set, which is a safe
/// subset of the RFC 5987 attr-char set.
fn percent_encode(value: &str) -> String {
    let mut encoded = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Best-effort fetch of the highest-resolution thumbnail into a temp file.
/// Album art is optional, so any failure only logs a warning.
async fn fetch_cover_art(http: &reqwest::Client, probe: &VideoProbe) -> Option<NamedTempFile> {
    let thumbnails = probe.thumbnails.as_deref().unwrap_or_default();
    let url = best_thumbnail(thumbnails)
        .and_then(|thumbnail| thumbnail.url.clone())
        .or_else(|| probe.thumbnail.clone())?;
    match download_to_temp_file(http, &url).await {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("  Warning: could not fetch cover art from {url}: {err:#}");
            None
        }
    }
}

async fn download_to_temp_file(http: &reqwest::Client, url: &str) -> Result<NamedTempFile> {
    let response = http
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("fetching {url}"))?;
    let bytes = response.bytes().await.context("reading response body")?;
    let file = NamedTempFile::new().context("creating temp file")?;
    tokio::fs::write(file.path(), &bytes)
        .await
        .context("writing temp file")?;
    Ok(file)
}

/// ID3 tag values derived from probed metadata. Empty candidates are
/// dropped so the transcoder never writes blank tags.
fn mp3_tags(probe: &VideoProbe) -> Vec<(&'static str, String)> {
    let artist = probe
        .artists
        .as_ref()
        .and_then(|artists| artists.first().cloned())
        .or_else(|| probe.uploader.clone())
        .or_else(|| probe.channel.as_ref().and_then(|channel| channel.first().cloned()));
    let title = probe.title.clone().or_else(|| probe.track.clone());
    let album = probe.album.clone().or_else(|| probe.title.clone());
    let date = probe
        .upload_date
        .as_deref()
        .map(|date| date.chars().take(4).collect::<String>());
    let comment = probe.webpage_url.clone();

    let mut tags = Vec::new();
    for (key, value) in [
        ("title", title),
        ("artist", artist),
        ("album", album),
        ("date", date),
        ("comment", comment),
    ] {
        if let Some(value) = value
            && !value.trim().is_empty()
        {
            tags.push((key, value));
        }
    }
    tags
}

/// Argument list for the transcoder: read the audio URL (and cover art when
/// available), encode to MP3 on stdout, and write ID3v2.3 tags so older
/// players pick them up.
fn transcoder_args(
    audio_url: &str,
    cover: Option<&Path>,
    tags: &[(&'static str, String)],
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-v".to_owned(),
        "error".to_owned(),
        "-i".to_owned(),
        audio_url.to_owned(),
    ];

    match cover {
        Some(path) => {
            args.push("-i".to_owned());
            args.push(path.to_string_lossy().to_string());
            args.extend(
                [
                    "-map",
                    "0:a",
                    "-map",
                    "1:v",
                    "-c:v",
                    "mjpeg",
                    "-disposition:v",
                    "attached_pic",
                    "-metadata:s:v",
                    "title=Album cover",
                    "-metadata:s:v",
                    "comment=Cover (front)",
                ]
                .into_iter()
                .map(str::to_owned),
            );
        }
        None => args.push("-vn".to_owned()),
    }

    args.extend(
        ["-c:a", "libmp3lame", "-q:a", "2", "-id3v2_version", "3"]
            .into_iter()
            .map(str::to_owned),
    );
    for (key, value) in tags {
        args.push("-metadata".to_owned());
        args.push(format!("{key}={value}"));
    }
    args.extend(["-f", "mp3", "pipe:1"].into_iter().map(str::to_owned));
    args
}

/// First non-empty of title and track name, sanitized, or a plain fallback.
fn default_mp3_name(probe: &VideoProbe) -> String {
    [probe.title.as_deref(), probe.track.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(sanitize_filename)
        .unwrap_or_else(|| "audio".to_owned())
}
