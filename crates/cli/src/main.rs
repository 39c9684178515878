use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

use orgpol_aws::{AwsCli, CliOrganizations, S3BlobStore};
use orgpol_cfn::{handle_event, CustomResourceEvent, HttpResponseSender};
use orgpol_core::{FixedPacing, NoPacing, Pacing, Reconciler};

mod runtime;

#[derive(Parser, Debug)]
#[command(author, version, about="org-policy-manager: CloudFormation custom resource for organization policies")]
struct Cli {
    /// Region passed to the aws CLI
    #[arg(long, env = "AWS_REGION", global = true)]
    region: Option<String>,

    /// Named profile passed to the aws CLI
    #[arg(long, env = "AWS_PROFILE", global = true)]
    profile: Option<String>,

    /// Path to the aws executable (default: PATH lookup)
    #[arg(long = "aws-cli", env = "ORG_POLICY_AWS_CLI", global = true)]
    aws_cli: Option<PathBuf>,

    /// Pause before each attach call, in seconds
    #[arg(long, default_value_t = 5, global = true)]
    attach_delay_secs: u64,

    /// Pause before retrying a detach that hit "policy in use", in seconds
    #[arg(long, default_value_t = 1, global = true)]
    detach_retry_delay_secs: u64,

    /// Skip all pauses
    #[arg(long, default_value_t = false, global = true)]
    no_pacing: bool,

    /// Log stream named in the response Reason
    #[arg(long, env = "AWS_LAMBDA_LOG_STREAM_NAME", default_value = "local", global = true)]
    log_stream_name: String,

    #[arg(long, default_value = "info", global = true)]
    log_level: tracing::Level,

    /// Runtime API host:port; `serve` is the default when set
    #[arg(long, env = "AWS_LAMBDA_RUNTIME_API", global = true)]
    runtime_api: Option<String>,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Process one event from a file (or `-` for stdin) and print the response
    Handle {
        #[arg(short, long, default_value = "-")]
        event: PathBuf,
    },
    /// Run the Lambda custom-runtime loop
    Serve,
}

impl Cli {
    fn pacing(&self) -> Arc<dyn Pacing> {
        if self.no_pacing {
            return Arc::new(NoPacing);
        }
        Arc::new(FixedPacing {
            attach_delay: Duration::from_secs(self.attach_delay_secs),
            detach_retry_delay: Duration::from_secs(self.detach_retry_delay_secs),
        })
    }

    fn reconciler(&self) -> Reconciler {
        let aws = AwsCli::locate(self.aws_cli.clone(), self.region.clone(), self.profile.clone());
        Reconciler::new(
            Arc::new(CliOrganizations::new(aws.clone())),
            Arc::new(S3BlobStore::new(aws)),
            self.pacing(),
        )
    }
}

fn read_event(path: &Path) -> Result<CustomResourceEvent> {
    let raw = if path.as_os_str() == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s).context("read event from stdin")?;
        s
    } else {
        std::fs::read_to_string(path).with_context(|| format!("read event {}", path.display()))?
    };
    serde_json::from_str(&raw).context("decode custom resource event")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .json()
        .with_max_level(cli.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let reconciler = cli.reconciler();
    let sender = HttpResponseSender::default();

    match &cli.cmd {
        Some(Cmd::Handle { event }) => {
            let event = read_event(event)?;
            let response = handle_event(&event, &reconciler, &sender, &cli.log_stream_name).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Some(Cmd::Serve) | None => {
            let api = cli
                .runtime_api
                .as_deref()
                .context("AWS_LAMBDA_RUNTIME_API is not set; use `handle` outside Lambda")?;
            let runtime = runtime::RuntimeClient::new(reqwest::Client::new(), api);
            runtime::serve(&runtime, &reconciler, &sender, &cli.log_stream_name).await?;
        }
    }
    Ok(())
}
