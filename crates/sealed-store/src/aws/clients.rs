//! AWS SDK client bundle.

use aws_config::BehaviorVersion;

/// KMS and S3 clients built from one shared [`aws_config::SdkConfig`], so
/// credentials are resolved once and reused.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// KMS client backing [`crate::keys::KmsKeyProvider`].
    pub kms: aws_sdk_kms::Client,
    /// S3 client backing [`crate::store::S3Store`].
    pub s3: aws_sdk_s3::Client,
}

impl AwsClients {
    /// Load the SDK config and build both clients.
    ///
    /// With `endpoint_url` set, S3 switches to path-style addressing, which
    /// emulators such as LocalStack expect.
    pub async fn init(endpoint_url: Option<&str>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let mut kms = aws_sdk_kms::config::Builder::from(&config);
        let mut s3 = aws_sdk_s3::config::Builder::from(&config);
        if let Some(url) = endpoint_url {
            kms = kms.endpoint_url(url);
            s3 = s3.endpoint_url(url).force_path_style(true);
        }

        Self {
            kms: aws_sdk_kms::Client::from_conf(kms.build()),
            s3: aws_sdk_s3::Client::from_conf(s3.build()),
        }
    }
}
