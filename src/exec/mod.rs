//! Remote command execution inside the shared site pod
//!
//! Commands run through the Kubernetes `pods/exec` subresource as
//! `/bin/bash -c <command>` with stdin closed. A non-zero remote exit is not
//! an error here; callers detect it through the `exec_code=` markers that
//! [`ShellScript`] appends (see [`ExecResult::is_ok`]).

mod result;
mod script;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

pub use result::{ExecResult, FailedMarker, EXEC_MARKER};
pub use script::ShellScript;

/// Default upper bound for a single exec call
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(150);

/// Container that remote commands run in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodTarget {
    /// Namespace of the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container name inside the pod
    pub container: String,
}

impl std::fmt::Display for PodTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.pod, self.container)
    }
}

/// Runs shell commands inside a container
///
/// Implementations never fail outright: transport problems are reported in
/// [`ExecResult::transport_error`] so every step is gated the same way.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` with `/bin/bash -c` in the target container and capture its output
    async fn execute(&self, target: &PodTarget, command: &str) -> ExecResult;
}

/// [`RemoteExecutor`] backed by the Kubernetes exec subresource
pub struct KubeExecutor {
    client: Client,
    timeout: Duration,
}

impl KubeExecutor {
    /// Create an executor with the given per-call timeout
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn run(&self, target: &PodTarget, command: &str) -> Result<(String, String), String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = pods
            .exec(&target.pod, ["/bin/bash", "-c", command], &params)
            .await
            .map_err(|e| format!("exec failed: {}", e))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();

        let read_stdout = async {
            let mut buf = String::new();
            if let Some(mut reader) = stdout {
                reader.read_to_string(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let read_stderr = async {
            let mut buf = String::new();
            if let Some(mut reader) = stderr {
                reader.read_to_string(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
        let stdout = stdout.map_err(|e| format!("reading stdout failed: {}", e))?;
        let stderr = stderr.map_err(|e| format!("reading stderr failed: {}", e))?;

        attached
            .join()
            .await
            .map_err(|e| format!("exec stream failed: {}", e))?;

        Ok((stdout.trim().to_string(), stderr.trim().to_string()))
    }
}

#[async_trait]
impl RemoteExecutor for KubeExecutor {
    async fn execute(&self, target: &PodTarget, command: &str) -> ExecResult {
        debug!(target = %target, "running remote command");

        match tokio::time::timeout(self.timeout, self.run(target, command)).await {
            Ok(Ok((stdout, stderr))) => ExecResult::completed(stdout, stderr),
            Ok(Err(e)) => {
                warn!(target = %target, error = %e, "remote exec transport failure");
                ExecResult::transport_failure(e)
            }
            Err(_) => {
                warn!(target = %target, timeout_secs = self.timeout.as_secs(), "remote exec timed out");
                ExecResult::transport_failure(format!(
                    "exec timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}
