#![forbid(unsafe_code)]

//! Shells out to the resolver binary (yt-dlp or a compatible drop-in) to turn
//! watch-page URLs into direct media URLs and to probe format listings.
//!
//! Every invocation walks the same cookie fallback chain: browser cookies when
//! a Firefox profile is present, then a Netscape-format cookie file, then no
//! cookies at all. A bounded semaphore keeps the number of live subprocesses
//! under control no matter how many requests arrive at once.

use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::probe::VideoProbe;

/// Conventional name of the resolver program when nothing is configured.
const RESOLVER_PROGRAM: &str = "yt-dlp";
/// Where release archives usually install the resolver.
const USUAL_INSTALL_PATH: &str = "/usr/local/bin/yt-dlp";

/// One way of presenting cookies to the resolver binary.
#[derive(Debug, Clone, PartialEq)]
pub enum CookieSource {
    Firefox,
    File(PathBuf),
    NoCookies,
}

impl CookieSource {
    fn apply(&self, command: &mut Command) {
        match self {
            CookieSource::Firefox => {
                command.arg("--cookies-from-browser").arg("firefox");
            }
            CookieSource::File(path) => {
                command
                    .arg("--cookies")
                    .arg(path.to_string_lossy().to_string());
            }
            CookieSource::NoCookies => {}
        }
    }

    fn describe(&self) -> String {
        match self {
            CookieSource::Firefox => "Firefox cookies".to_owned(),
            CookieSource::File(path) => format!("cookie file {}", path.display()),
            CookieSource::NoCookies => "no cookies".to_owned(),
        }
    }
}

/// Handle on the resolver binary shared by every request handler.
#[derive(Clone)]
pub struct Resolver {
    binary: PathBuf,
    cookies_file: Option<PathBuf>,
    firefox_bases: Vec<PathBuf>,
    permits: Arc<Semaphore>,
}

impl Resolver {
    pub fn new(binary: PathBuf, cookies_file: Option<PathBuf>, jobs: usize) -> Self {
        Self {
            binary,
            cookies_file,
            firefox_bases: default_firefox_bases(),
            permits: Arc::new(Semaphore::new(jobs.max(1))),
        }
    }

    /// Replaces the directories scanned for Firefox profiles. Useful for
    /// containers where the default profile locations do not apply.
    pub fn with_firefox_bases(mut self, bases: Vec<PathBuf>) -> Self {
        self.firefox_bases = bases;
        self
    }

    /// Resolves `url` into the direct media URLs printed for `selector`, in
    /// the order the resolver printed them. An empty vector means the
    /// resolver exited cleanly without finding a direct stream.
    pub async fn resolve(&self, url: &str, selector: &str) -> Result<Vec<String>> {
        let resolver = self.clone();
        let url = url.to_owned();
        let selector = selector.to_owned();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("acquiring resolver slot")?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            resolver.resolve_blocking(&url, &selector)
        })
        .await
        .context("joining resolver task")?
    }

    /// Runs a metadata probe and parses the single-JSON payload.
    pub async fn probe(&self, url: &str) -> Result<VideoProbe> {
        let resolver = self.clone();
        let url = url.to_owned();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("acquiring resolver slot")?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            resolver.probe_blocking(&url)
        })
        .await
        .context("joining resolver task")?
    }

    /// One line naming the cookie sources in the order they will be tried,
    /// for startup logs.
    pub fn describe_cookie_chain(&self) -> String {
        let parts: Vec<String> = self
            .cookie_sources()
            .iter()
            .map(CookieSource::describe)
            .collect();
        parts.join(", then ")
    }

    fn resolve_blocking(&self, url: &str, selector: &str) -> Result<Vec<String>> {
        let sources = self.cookie_sources();
        let total = sources.len();
        for (index, source) in sources.into_iter().enumerate() {
            let mut command = Command::new(&self.binary);
            command
                .arg("-f")
                .arg(selector)
                .arg("--no-playlist")
                .arg("-g");
            source.apply(&mut command);
            command.arg(url);

            match run_capture(command, url) {
                Ok(stdout) => return Ok(url_lines(&stdout)),
                Err(err) if index + 1 < total => {
                    eprintln!(
                        "  Warning: resolving with {} failed: {:#}",
                        source.describe(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
        bail!("no cookie sources to try for {url}");
    }

    fn probe_blocking(&self, url: &str) -> Result<VideoProbe> {
        let sources = self.cookie_sources();
        let total = sources.len();
        for (index, source) in sources.into_iter().enumerate() {
            let mut command = Command::new(&self.binary);
            command
                .arg("--dump-single-json")
                .arg("--no-playlist")
                .arg("--skip-download")
                .arg("--no-warnings")
                .arg("--no-progress");
            source.apply(&mut command);
            command.arg(url);

            match run_capture(command, url) {
                Ok(stdout) => {
                    let probe: VideoProbe =
                        serde_json::from_str(&stdout).context("deserializing probe JSON")?;
                    return Ok(probe);
                }
                Err(err) if index + 1 < total => {
                    eprintln!(
                        "  Warning: probing with {} failed: {:#}",
                        source.describe(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
        bail!("no cookie sources to try for {url}");
    }

    /// The fallback chain for one invocation, most-authenticated first. The
    /// bare attempt is always present so public videos keep working when
    /// every cookie source is stale or missing.
    fn cookie_sources(&self) -> Vec<CookieSource> {
        let mut sources = Vec::new();
        if firefox_cookie_db_under(&self.firefox_bases) {
            sources.push(CookieSource::Firefox);
        }
        if let Some(path) = &self.cookies_file
            && is_netscape_cookie_file(path)
        {
            sources.push(CookieSource::File(path.clone()));
        }
        sources.push(CookieSource::NoCookies);
        sources
    }
}

/// Runs the command, returning stdout on success and a cleaned-up error
/// message on a nonzero exit. Benign cookie-parsing complaints are stripped
/// so callers see the line that actually explains the failure.
fn run_capture(mut command: Command, url: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("running resolver for {url}"))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut message = filter_noise(&stderr);
    if message.is_empty() {
        message = filter_noise(&stdout);
    }
    if message.is_empty() {
        message = format!("resolver exited with {}", output.status);
    }
    bail!("{message}");
}

/// Keeps only the lines a caller can act on. The resolver complains loudly
/// about malformed cookie file entries even when those entries are irrelevant
/// to the request at hand.
fn filter_noise(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lowered = line.to_lowercase();
            !lowered.contains("skipping cookie file entry")
                && !lowered.contains("does not look like a netscape format")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts the direct media URLs from `-g` output, dropping any informational
/// lines the resolver interleaves.
fn url_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_owned)
        .collect()
}

/// True when the file exists, is non-empty, and its first line looks like a
/// Netscape cookie file header. Anything else would make the resolver error
/// out instead of authenticating.
///
/// Only the header line is inspected (capped at 512 bytes); the cookie
/// payload can be large and need not be valid UTF-8 past the first line.
pub fn is_netscape_cookie_file(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut first_line = String::new();
    if BufReader::new(file).take(512).read_line(&mut first_line).is_err() {
        return false;
    }
    let lowered = first_line.to_lowercase();
    lowered.contains("netscape") || lowered.contains("http cookie")
}

fn default_firefox_bases() -> Vec<PathBuf> {
    let Ok(home) = env::var("HOME") else {
        return Vec::new();
    };
    let home = Path::new(&home);
    vec![
        home.join(".mozilla").join("firefox"),
        home.join(".config").join("mozilla").join("firefox"),
    ]
}

/// Scans each base for `<base>/<profile>/cookies.sqlite`, exactly one
/// directory deep, which is where Firefox keeps its cookie database.
fn firefox_cookie_db_under(bases: &[PathBuf]) -> bool {
    bases.iter().any(|base| {
        base.is_dir()
            && WalkDir::new(base)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .any(|entry| {
                    entry.file_type().is_file()
                        && entry.file_name().to_str() == Some("cookies.sqlite")
                })
    })
}

/// Locates the resolver binary: explicit configuration wins, then the
/// conventional install path, then a sibling of the running executable, then
/// whatever PATH provides.
pub fn find_resolver_binary(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        bail!(
            "configured resolver binary {} does not exist",
            path.display()
        );
    }

    let usual = Path::new(USUAL_INSTALL_PATH);
    if usual.is_file() {
        return Ok(usual.to_path_buf());
    }

    if let Ok(exe) = env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(RESOLVER_PROGRAM);
        if sibling.is_file() {
            return Ok(sibling);
        }
    }

    ensure_program_available(Path::new(RESOLVER_PROGRAM))?;
    Ok(PathBuf::from(RESOLVER_PROGRAM))
}

/// Runs `<program> --version` to fail loudly when external dependencies such
/// as the resolver or the transcoder are missing.
pub fn ensure_program_available(program: &Path) -> Result<()> {
    let status = Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!(
            "{} is not installed or not in PATH: {}",
            program.display(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn install_stub(dir: &Path, script: &str) -> Result<PathBuf> {
        let script_path = dir.join("resolver");
        fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }
        Ok(script_path)
    }

    fn stub_resolver(binary: PathBuf, cookies_file: Option<PathBuf>) -> Resolver {
        Resolver::new(binary, cookies_file, 1).with_firefox_bases(Vec::new())
    }

    #[tokio::test]
    async fn resolve_passes_selector_and_single_video_flags() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
echo "https://cdn.example/stream-a"
echo "resolved one stream"
echo "https://cdn.example/stream-b"
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let urls = resolver
            .resolve("https://video.example/watch?v=abc", "best[height<=720]")
            .await?;
        assert_eq!(
            urls,
            ["https://cdn.example/stream-a", "https://cdn.example/stream-b"]
        );

        let recorded = fs::read_to_string(temp.path().join("args.txt"))?;
        let args: Vec<&str> = recorded.lines().collect();
        assert_eq!(
            args,
            [
                "-f",
                "best[height<=720]",
                "--no-playlist",
                "-g",
                "https://video.example/watch?v=abc"
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn resolve_returns_empty_when_nothing_printed_looks_like_a_url() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
echo "no direct stream for you"
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let urls = resolver.resolve("https://video.example/watch?v=abc", "best").await?;
        assert!(urls.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn resolve_falls_back_to_bare_attempt_when_cookie_file_fails() -> Result<()> {
        let temp = tempdir()?;
        let cookies = temp.path().join("cookies.txt");
        fs::write(&cookies, "# Netscape HTTP Cookie File\n.example\tTRUE\t/\n")?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
dir="$(dirname "$0")"
echo "run" >> "$dir/calls.txt"
printf '%s\n' "$@" > "$dir/args.txt"
for arg in "$@"; do
  if [[ "$arg" == "--cookies" ]]; then
    echo "ERROR: cookie jar rejected" >&2
    exit 1
  fi
done
echo "https://cdn.example/fallback"
"#,
        )?;

        let resolver = stub_resolver(stub, Some(cookies));
        let urls = resolver.resolve("https://video.example/watch?v=abc", "best").await?;
        assert_eq!(urls, ["https://cdn.example/fallback"]);

        let calls = fs::read_to_string(temp.path().join("calls.txt"))?;
        assert_eq!(calls.lines().count(), 2, "cookie attempt plus bare attempt");
        let last_args = fs::read_to_string(temp.path().join("args.txt"))?;
        assert!(!last_args.contains("--cookies"));
        Ok(())
    }

    #[tokio::test]
    async fn resolve_skips_cookie_file_without_netscape_header() -> Result<()> {
        let temp = tempdir()?;
        let cookies = temp.path().join("cookies.txt");
        fs::write(&cookies, "{\"exported\": \"from some browser extension\"}\n")?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
dir="$(dirname "$0")"
echo "run" >> "$dir/calls.txt"
printf '%s\n' "$@" > "$dir/args.txt"
echo "https://cdn.example/direct"
"#,
        )?;

        let resolver = stub_resolver(stub, Some(cookies));
        resolver.resolve("https://video.example/watch?v=abc", "best").await?;

        let calls = fs::read_to_string(temp.path().join("calls.txt"))?;
        assert_eq!(calls.lines().count(), 1);
        let args = fs::read_to_string(temp.path().join("args.txt"))?;
        assert!(!args.contains("--cookies"));
        Ok(())
    }

    #[tokio::test]
    async fn resolve_error_keeps_actionable_lines_only() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
echo "WARNING: skipping cookie file entry due to invalid length 2" >&2
echo "WARNING: The cookies file does not look like a Netscape format cookies file" >&2
echo "ERROR: Video unavailable" >&2
exit 1
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let err = resolver
            .resolve("https://video.example/watch?v=gone", "best")
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("ERROR: Video unavailable"));
        assert!(!message.contains("skipping cookie file entry"));
        assert!(!message.contains("Netscape format"));
        Ok(())
    }

    #[tokio::test]
    async fn resolve_error_falls_back_to_exit_status_when_silent() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
exit 3
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let err = resolver
            .resolve("https://video.example/watch?v=abc", "best")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("resolver exited with"));
        Ok(())
    }

    #[tokio::test]
    async fn probe_parses_single_json_payload() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
cat <<'JSON'
{
  "id": "alpha",
  "title": "Alpha Title",
  "channel": "Channel",
  "duration": 120,
  "formats": [
    {
      "format_id": "18",
      "format": "18 - 640x360 (360p)",
      "ext": "mp4",
      "protocol": "https",
      "vcodec": "avc1.42001E",
      "acodec": "mp4a.40.2",
      "height": 360,
      "url": "https://cdn.example/18"
    }
  ]
}
JSON
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let probe = resolver.probe("https://video.example/watch?v=alpha").await?;
        assert_eq!(probe.id.as_deref(), Some("alpha"));
        assert_eq!(probe.formats.as_deref().map(<[_]>::len), Some(1));

        let recorded = fs::read_to_string(temp.path().join("args.txt"))?;
        let args: Vec<&str> = recorded.lines().collect();
        assert_eq!(
            args,
            [
                "--dump-single-json",
                "--no-playlist",
                "--skip-download",
                "--no-warnings",
                "--no-progress",
                "https://video.example/watch?v=alpha"
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn probe_rejects_garbage_payload() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
echo "this is not json"
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let err = resolver
            .probe("https://video.example/watch?v=abc")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("deserializing probe JSON"));
        Ok(())
    }

    #[tokio::test]
    async fn single_permit_serializes_subprocess_runs() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_stub(
            temp.path(),
            r#"#!/usr/bin/env bash
dir="$(dirname "$0")"
echo "begin" >> "$dir/trace.txt"
sleep 0.3
echo "end" >> "$dir/trace.txt"
echo "https://cdn.example/slow"
"#,
        )?;

        let resolver = stub_resolver(stub, None);
        let (first, second) = tokio::join!(
            resolver.resolve("https://video.example/watch?v=a", "best"),
            resolver.resolve("https://video.example/watch?v=b", "best"),
        );
        first?;
        second?;

        let trace = fs::read_to_string(temp.path().join("trace.txt"))?;
        let events: Vec<&str> = trace.lines().collect();
        assert_eq!(events, ["begin", "end", "begin", "end"]);
        Ok(())
    }

    #[test]
    fn netscape_header_detection() -> Result<()> {
        let temp = tempdir()?;

        let classic = temp.path().join("classic.txt");
        fs::write(&classic, "# Netscape HTTP Cookie File\n")?;
        assert!(is_netscape_cookie_file(&classic));

        let lowercase = temp.path().join("lower.txt");
        fs::write(&lowercase, "# http cookie export\n")?;
        assert!(is_netscape_cookie_file(&lowercase));

        let json_export = temp.path().join("export.json");
        fs::write(&json_export, "[{\"domain\": \".example\"}]\n")?;
        assert!(!is_netscape_cookie_file(&json_export));

        let empty = temp.path().join("empty.txt");
        fs::write(&empty, "")?;
        assert!(!is_netscape_cookie_file(&empty));

        assert!(!is_netscape_cookie_file(&temp.path().join("missing.txt")));
        Ok(())
    }

    #[test]
    fn netscape_detection_reads_only_the_header_line() -> Result<()> {
        let temp = tempdir()?;

        let binary_tail = temp.path().join("mixed.txt");
        fs::write(
            &binary_tail,
            b"# Netscape HTTP Cookie File\n\xfe\xff\x00binary payload\n",
        )?;
        assert!(is_netscape_cookie_file(&binary_tail));

        let binary_header = temp.path().join("binary.txt");
        fs::write(
            &binary_header,
            b"\xfe\xff\x00\n# Netscape HTTP Cookie File\n",
        )?;
        assert!(!is_netscape_cookie_file(&binary_header));
        Ok(())
    }

    #[test]
    fn cookie_chain_description_lists_sources_in_fallback_order() -> Result<()> {
        let temp = tempdir()?;
        let cookies = temp.path().join("cookies.txt");
        fs::write(&cookies, "# Netscape HTTP Cookie File\n")?;

        let with_file = stub_resolver(PathBuf::from("resolver"), Some(cookies.clone()));
        assert_eq!(
            with_file.describe_cookie_chain(),
            format!("cookie file {}, then no cookies", cookies.display())
        );

        let bare = stub_resolver(PathBuf::from("resolver"), None);
        assert_eq!(bare.describe_cookie_chain(), "no cookies");

        let base = temp.path().join("firefox");
        let profile = base.join("abcd1234.default-release");
        fs::create_dir_all(&profile)?;
        fs::write(profile.join("cookies.sqlite"), "sqlite")?;
        let with_firefox =
            Resolver::new(PathBuf::from("resolver"), None, 1).with_firefox_bases(vec![base]);
        assert_eq!(
            with_firefox.describe_cookie_chain(),
            "Firefox cookies, then no cookies"
        );
        Ok(())
    }

    #[test]
    fn firefox_detection_wants_profile_level_cookie_db() -> Result<()> {
        let temp = tempdir()?;
        let base = temp.path().join("firefox");
        let profile = base.join("abcd1234.default-release");
        fs::create_dir_all(&profile)?;

        assert!(!firefox_cookie_db_under(&[base.clone()]));

        fs::write(base.join("cookies.sqlite"), "too shallow")?;
        assert!(!firefox_cookie_db_under(&[base.clone()]));

        let nested = profile.join("storage");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("cookies.sqlite"), "too deep")?;
        assert!(!firefox_cookie_db_under(&[base.clone()]));

        fs::write(profile.join("cookies.sqlite"), "sqlite")?;
        assert!(firefox_cookie_db_under(&[base]));
        Ok(())
    }

    #[test]
    fn firefox_detection_handles_missing_bases() {
        assert!(!firefox_cookie_db_under(&[]));
        assert!(!firefox_cookie_db_under(&[PathBuf::from(
            "/nonexistent/firefox/base"
        )]));
    }

    #[test]
    fn configured_binary_must_exist() -> Result<()> {
        let temp = tempdir()?;
        let present = temp.path().join("resolver");
        fs::write(&present, "#!/usr/bin/env bash\n")?;

        let found = find_resolver_binary(Some(&present))?;
        assert_eq!(found, present);

        let err = find_resolver_binary(Some(&temp.path().join("missing"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        Ok(())
    }

    #[test]
    fn url_lines_keeps_printed_order_and_drops_chatter() {
        let stdout = "https://cdn.example/video\nExtracting cookies\nhttps://cdn.example/audio\nftp://cdn.example/legacy\n";
        assert_eq!(
            url_lines(stdout),
            ["https://cdn.example/video", "https://cdn.example/audio"]
        );
    }

    #[test]
    fn filter_noise_drops_benign_warnings_case_insensitively() {
        let raw = "WARNING: Skipping cookie file entry due to invalid length 2\nERROR: real problem\nwarning: the file DOES NOT LOOK LIKE A NETSCAPE FORMAT cookies file\n";
        assert_eq!(filter_noise(raw), "ERROR: real problem");
    }
}
