use super::{Extractor, types::*};
use crate::config::Extraction;
use crate::table::{BBox, ExtractedTable, ExtractionParams};
use crate::util::{WaitError, expand_tilde, wait_with_timeout};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Serialize, de::DeserializeOwned};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

const RUNNER: &str = "camelot_runner.py";

/// Request envelope understood by the runner script.
#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum RunnerRequest<'a> {
    Doctor,
    Extract { req: &'a ExtractIn },
}

/// Camelot behind a Python subprocess: one process per request, JSON on
/// stdin, JSON on stdout.
pub struct CamelotEngine {
    runner: PathBuf,
    python_exe: PathBuf,
    timeout: Option<Duration>,
    env: Vec<(String, String)>,
}

impl CamelotEngine {
    pub fn new(cfg: &Extraction) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.scripts_dir);
        if cfg.pin_scripts_dir {
            ensure_under_cwd(&scripts_dir)?;
        }
        let runner = scripts_dir.join(RUNNER);
        if !runner.is_file() {
            bail!("missing camelot runner: {}", runner.display());
        }
        Ok(Self {
            runner,
            python_exe: resolve_python_exe(&cfg.python_exe),
            timeout: (cfg.timeout_seconds > 0).then(|| Duration::from_secs(cfg.timeout_seconds)),
            env: cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    pub fn doctor(&self) -> Result<DocDiag> {
        self.exchange(&RunnerRequest::Doctor)
    }

    fn exchange<O: DeserializeOwned>(&self, request: &RunnerRequest<'_>) -> Result<O> {
        let output = self.run(&serde_json::to_vec(request)?)?;
        if !output.status.success() {
            bail!(
                "camelot runner exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !output.stderr.is_empty() {
            debug!(
                "camelot runner stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        serde_json::from_slice(&output.stdout).with_context(|| "parsing camelot runner output")
    }

    fn run(&self, stdin_bytes: &[u8]) -> Result<Output> {
        debug!(
            "camelot runner {} {} timeout={:?}",
            self.python_exe.display(),
            self.runner.display(),
            self.timeout
        );
        let mut child = Command::new(&self.python_exe)
            .arg(&self.runner)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", self.python_exe.display()))?;

        // Closing stdin is the end-of-request marker.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_bytes)
                .with_context(|| "writing camelot request")?;
        }

        let Some(timeout) = self.timeout else {
            return child.wait_with_output().with_context(|| "waiting for camelot runner");
        };
        match wait_with_timeout(&mut child, timeout) {
            Ok(output) => Ok(output),
            Err(WaitError::Timeout(t, output)) => Err(anyhow!(
                "camelot runner exceeded {t:?}; stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(WaitError::Io(e)) => Err(e),
        }
    }
}

impl Extractor for CamelotEngine {
    fn extract(
        &self,
        filepath: &Path,
        page: u32,
        params: &ExtractionParams,
        table_areas: Option<&[BBox]>,
    ) -> Result<Vec<ExtractedTable>> {
        let req = ExtractIn {
            filepath: filepath.display().to_string(),
            page,
            params: params.clone(),
            table_areas: table_areas.map(|a| a.iter().map(BBox::to_area_string).collect()),
        };
        let out: ExtractOut = self.exchange(&RunnerRequest::Extract { req: &req })?;
        for w in &out.warnings {
            debug!("camelot warning page={page} params={params}: {w}");
        }
        if !out.ok {
            let msg = out
                .error
                .unwrap_or_else(|| "camelot extract failed".to_string());
            warn!("camelot returned ok=false page={page} params={params}: {msg}");
            bail!(msg);
        }
        Ok(out.tables)
    }
}

fn ensure_under_cwd(dir: &Path) -> Result<()> {
    let cwd = std::env::current_dir().with_context(|| "current_dir")?;
    let canon = dir
        .canonicalize()
        .with_context(|| format!("scripts_dir not found: {}", dir.display()))?;
    if !canon.starts_with(&cwd) {
        bail!(
            "scripts_dir {} is outside the working directory (extraction.pin_scripts_dir = true)",
            canon.display()
        );
    }
    Ok(())
}

/// `auto` (or empty) prefers `$CAMELOT_PYTHON` when it points at a file.
fn resolve_python_exe(raw: &str) -> PathBuf {
    match raw.trim() {
        "" | "auto" => std::env::var("CAMELOT_PYTHON")
            .map(|v| expand_tilde(&v))
            .ok()
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("python3")),
        explicit => expand_tilde(explicit),
    }
}
