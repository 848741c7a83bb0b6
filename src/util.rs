use crate::config::Hashing;
use anyhow::{Context, Result, anyhow, bail};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Output};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, UNIX_EPOCH};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// How a source document is fingerprinted for cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    /// Modification time only; cheap, and what invalidates entries on edit.
    Mtime,
    /// Head and tail windows plus the file size.
    FastWindows,
    FullSha256,
}

impl std::str::FromStr for HashMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mtime" => Ok(HashMode::Mtime),
            "fast_2x16mb" => Ok(HashMode::FastWindows),
            "full_sha256" => Ok(HashMode::FullSha256),
            other => bail!("unknown hashing.mode: {other}"),
        }
    }
}

/// Modification time in nanoseconds since the epoch.
pub fn mtime_nanos(path: &Path) -> Result<u128> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("stat {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0))
}

/// Fingerprint of a file according to `hashing.mode`.
pub fn hash_file(cfg: &Hashing, path: &Path) -> Result<String> {
    let open = || File::open(path).with_context(|| format!("open {}", path.display()));
    let mut h = Sha256::new();
    match cfg.mode.parse()? {
        HashMode::Mtime => return Ok(format!("mtime:{}", mtime_nanos(path)?)),
        HashMode::FullSha256 => {
            std::io::copy(&mut open()?, &mut h).with_context(|| format!("read {}", path.display()))?;
        }
        HashMode::FastWindows => {
            let mut f = open()?;
            let size = f.metadata()?.len();
            let window = cfg.fast_window_bytes.min(size);
            hash_window(&mut f, &mut h, 0, window)?;
            if size > window {
                hash_window(&mut f, &mut h, size - window, window)?;
            }
            h.update(size.to_le_bytes());
        }
    }
    Ok(format!("{:x}", h.finalize()))
}

fn hash_window(f: &mut File, h: &mut Sha256, offset: u64, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    f.seek(SeekFrom::Start(offset))?;
    let copied = std::io::copy(&mut f.by_ref().take(len), h)?;
    if copied != len {
        bail!("short read: wanted {len} bytes at {offset}, got {copied}");
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("process exceeded timeout ({0:?})")]
    Timeout(Duration, Output),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>, name: &'static str) -> JoinHandle<Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)
                .with_context(|| format!("read {name}"))?;
        }
        Ok(buf)
    })
}

fn collect(
    status: ExitStatus,
    stdout: JoinHandle<Result<Vec<u8>>>,
    stderr: JoinHandle<Result<Vec<u8>>>,
) -> Result<Output> {
    let join = |h: JoinHandle<Result<Vec<u8>>>| -> Result<Vec<u8>> {
        h.join()
            .map_err(|_| anyhow!("pipe reader thread panicked"))?
    };
    Ok(Output {
        status,
        stdout: join(stdout)?,
        stderr: join(stderr)?,
    })
}

/// Wait for `child`, killing it once `timeout` elapses.
///
/// Both pipes are drained on background threads while waiting, so a child
/// writing more than a pipe buffer's worth cannot stall.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output, WaitError> {
    let stdout = drain(child.stdout.take(), "stdout");
    let stderr = drain(child.stderr.take(), "stderr");
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            return Ok(collect(status, stdout, stderr)?);
        }
        if Instant::now() >= deadline {
            warn!("child process timed out after {timeout:?}");
            let _ = child.kill();
            let status = child.wait().with_context(|| "wait after kill")?;
            return Err(WaitError::Timeout(timeout, collect(status, stdout, stderr)?));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hash_modes() {
        assert_eq!("mtime".parse::<HashMode>().unwrap(), HashMode::Mtime);
        assert_eq!("fast_2x16mb".parse::<HashMode>().unwrap(), HashMode::FastWindows);
        assert!("md5".parse::<HashMode>().is_err());
    }

    #[test]
    fn fast_windows_cover_head_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        std::fs::write(&a, b"head-middle1-tail").unwrap();
        std::fs::write(&b, b"head-middle2-tail").unwrap();
        let cfg = Hashing {
            mode: "fast_2x16mb".into(),
            fast_window_bytes: 4,
        };
        assert_eq!(hash_file(&cfg, &a).unwrap(), hash_file(&cfg, &b).unwrap());

        let full = Hashing {
            mode: "full_sha256".into(),
            ..cfg
        };
        assert_ne!(hash_file(&full, &a).unwrap(), hash_file(&full, &b).unwrap());
    }
}
