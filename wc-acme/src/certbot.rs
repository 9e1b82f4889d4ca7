use crate::session::{AttachedAgent, Environment};
use crate::types::Target;
use async_trait::async_trait;
use tracing::debug;
use wc_container::DockerClient;

/// How certbot is launched
#[derive(Debug, Clone)]
pub struct CertbotOptions {
    pub image: String,
    pub email: String,
    pub acme_server: String,
}

/// certbot arguments for a manual DNS-01 run covering `*.<bare>` and `<bare>`
pub fn certbot_args(target: &Target, options: &CertbotOptions, dry_run: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "certonly",
        "--manual",
        "--preferred-challenges=dns",
        "--email",
        options.email.as_str(),
        "--server",
        options.acme_server.as_str(),
        "--agree-tos",
        "-d",
        target.as_str(),
        "-d",
        target.bare_domain(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if dry_run {
        args.push("--dry-run".to_string());
    }
    args
}

/// certbot running in a throwaway Docker container
#[derive(Debug, Clone)]
pub struct CertbotEnvironment {
    docker: DockerClient,
    options: CertbotOptions,
}

impl CertbotEnvironment {
    pub fn new(docker: DockerClient, options: CertbotOptions) -> Self {
        Self { docker, options }
    }
}

#[async_trait]
impl Environment for CertbotEnvironment {
    async fn create(&self, target: &Target, dry_run: bool) -> anyhow::Result<String> {
        let args = certbot_args(target, &self.options, dry_run);
        debug!(args = ?args, "certbot command line");
        self.docker.create_container(&self.options.image, &args).await
    }

    async fn attach(&self, environment_id: &str) -> anyhow::Result<AttachedAgent> {
        let attached = self.docker.attach(environment_id).await?;
        let mut child = attached.child;
        Ok(AttachedAgent {
            lines: attached.lines,
            input: Box::new(attached.stdin),
            exit: Box::pin(async move {
                let status = child.wait().await?;
                debug!(%status, "certbot container exited");
                Ok(status.success())
            }),
        })
    }

    async fn copy_file(&self, environment_id: &str, path: &str) -> anyhow::Result<Vec<u8>> {
        self.docker.copy_file(environment_id, path).await
    }

    async fn destroy(&self, environment_id: &str) -> anyhow::Result<()> {
        self.docker.remove_container(environment_id).await
    }
}
