use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, warn};

mod organizations;
mod s3;

pub use organizations::CliOrganizations;
pub use s3::S3BlobStore;

/// Thin runner around the `aws` executable.
#[derive(Debug, Clone)]
pub struct AwsCli {
    bin: PathBuf,
    region: Option<String>,
    profile: Option<String>,
}

/// A non-zero exit from the CLI, or a failure to spawn it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliFailure {
    pub status: Option<i32>,
    pub stderr: String,
}

impl std::fmt::Display for CliFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "aws exited with {code}: {}", self.stderr.trim()),
            None => write!(f, "aws failed: {}", self.stderr.trim()),
        }
    }
}

impl AwsCli {
    /// Uses `bin` when given, otherwise looks `aws` up in PATH. A failed lookup
    /// still yields a runner so each call fails on its own and gets reported.
    pub fn locate(bin: Option<PathBuf>, region: Option<String>, profile: Option<String>) -> Self {
        let bin = resolve_bin(bin, || which::which("aws"));
        Self { bin, region, profile }
    }

    pub fn with_bin(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into(), region: None, profile: None }
    }

    /// `<service> <operation> <args...>` plus the global flags.
    pub fn command_args(&self, service: &str, operation: &str, args: &[(&str, &str)]) -> Vec<String> {
        let mut out = vec![service.to_string(), operation.to_string()];
        for (flag, value) in args {
            out.push(format!("--{flag}"));
            out.push(value.to_string());
        }
        if let Some(r) = &self.region {
            out.push("--region".into());
            out.push(r.clone());
        }
        if let Some(p) = &self.profile {
            out.push("--profile".into());
            out.push(p.clone());
        }
        out
    }

    pub async fn run(&self, args: &[String]) -> Result<Vec<u8>, CliFailure> {
        debug!(bin = %self.bin.display(), ?args, "running aws");
        let out = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CliFailure { status: None, stderr: format!("spawn {}: {e}", self.bin.display()) })?;
        if !out.status.success() {
            return Err(CliFailure {
                status: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(out.stdout)
    }
}

fn resolve_bin(
    explicit: Option<PathBuf>,
    lookup: impl FnOnce() -> which::Result<PathBuf>,
) -> PathBuf {
    if let Some(p) = explicit {
        return p;
    }
    match lookup() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "aws cli not found in PATH, calls will fail until it is installed");
            PathBuf::from("aws")
        }
    }
}

/// Error code and message from the CLI's
/// `An error occurred (Code) when calling the Op operation: message` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    pub code: String,
    pub operation: String,
    pub message: String,
}

pub fn parse_service_fault(stderr: &str) -> Option<ServiceFault> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"An error occurred \((?P<code>[A-Za-z0-9_.]+)\) when calling the (?P<op>[A-Za-z0-9]+) operation(?: \([^)]*\))?: (?P<msg>.*)",
        )
        .expect("static regex")
    });
    let caps = re.captures(stderr)?;
    Some(ServiceFault {
        code: caps["code"].to_string(),
        operation: caps["op"].to_string(),
        message: caps["msg"].trim().to_string(),
    })
}
