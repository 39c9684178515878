use async_trait::async_trait;
use orgpol_policy::{BlobStore, ContentError};

use crate::AwsCli;

/// Reads policy text with `aws s3 cp s3://bucket/key -`.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    cli: AwsCli,
}

impl S3BlobStore {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    fn args(&self, bucket: &str, key: &str) -> Vec<String> {
        let mut argv = vec![
            "s3".to_string(),
            "cp".to_string(),
            s3_uri(bucket, key),
            "-".to_string(),
            "--no-progress".to_string(),
        ];
        argv.extend(self.cli.command_args("s3", "cp", &[]).into_iter().skip(2));
        argv
    }
}

pub(crate) fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn fetch_text(&self, bucket: &str, key: &str) -> Result<String, ContentError> {
        let bytes = self
            .cli
            .run(&self.args(bucket, key))
            .await
            .map_err(|f| ContentError::ContentUnavailable(format!("{}: {f}", s3_uri(bucket, key))))?;
        String::from_utf8(bytes).map_err(|e| {
            ContentError::ContentUnavailable(format!("{} is not UTF-8: {e}", s3_uri(bucket, key)))
        })
    }
}
