//! Container hosting for participants shipped as images.

use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{Result, SimlabError},
    settings::DockerConfig,
};

/// Image label that overrides the exposed-port lookup.
pub const PORT_LABEL: &str = "port";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub container_id: String,
    pub image: String,
    pub host_port: u16,
}

impl RunningContainer {
    pub fn base_uri(&self) -> String {
        format!("http://localhost:{}", self.host_port)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pulls `image` when missing and runs it detached with its service port
    /// published on a free local port.
    async fn start(&self, image: &str, participant_id: &str) -> Result<RunningContainer>;

    /// Stops and removes the container.
    async fn stop(&self, container: &RunningContainer) -> Result<()>;

    /// Removes exited containers and dangling images.
    async fn cleanup(&self) -> Result<()>;
}

/// Asks the OS for a free TCP port on the loopback interface.
pub fn free_local_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Service port of an image, from its `port` label or else its first
/// exposed port. `config` is the image's `.Config` object.
pub fn container_port(config: &Value) -> Option<u16> {
    let from_label = config
        .get("Labels")
        .and_then(|labels| labels.get(PORT_LABEL))
        .and_then(Value::as_str)
        .and_then(|port| port.trim().parse().ok());

    from_label.or_else(|| {
        config
            .get("ExposedPorts")
            .and_then(Value::as_object)?
            .keys()
            .find_map(|key| key.split('/').next()?.parse().ok())
    })
}

/// Docker driven through its command-line client.
pub struct DockerCli {
    binary: String,
    command_timeout: Duration,
}

impl DockerCli {
    pub fn new(config: &DockerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                SimlabError::Container(format!(
                    "`{} {}` timed out after {:?}",
                    self.binary,
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| SimlabError::Container(format!("Failed to spawn {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(SimlabError::Container(format!(
                "`{} {}` failed: {}",
                self.binary,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn image_config(&self, image: &str) -> Result<Value> {
        let raw = self
            .docker(&["image", "inspect", "--format", "{{json .Config}}", image])
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    #[instrument(skip(self))]
    async fn start(&self, image: &str, participant_id: &str) -> Result<RunningContainer> {
        let config = match self.image_config(image).await {
            Ok(config) => config,
            Err(_) => {
                info!("Pulling image {}", image);
                self.docker(&["pull", image]).await?;
                self.image_config(image).await?
            }
        };

        let port = container_port(&config).ok_or_else(|| {
            SimlabError::Container(format!("Image {image} exposes no port and has no '{PORT_LABEL}' label"))
        })?;
        let host_port = free_local_port()?;
        let mapping = format!("{host_port}:{port}");
        let name = format!("simlab-{}-{}", participant_id, &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let container_id = self
            .docker(&["run", "-d", "--name", &name, "-p", &mapping, image])
            .await?;
        info!(%container_id, host_port, "Container started");

        Ok(RunningContainer {
            container_id,
            image: image.to_string(),
            host_port,
        })
    }

    #[instrument(skip(self), fields(container_id = %container.container_id))]
    async fn stop(&self, container: &RunningContainer) -> Result<()> {
        self.docker(&["stop", &container.container_id]).await?;
        self.docker(&["rm", &container.container_id]).await?;
        debug!("Container removed");
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        if let Err(e) = self.docker(&["container", "prune", "-f"]).await {
            warn!("Failed to prune containers: {}", e);
        }
        self.docker(&["image", "prune", "-f"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_port_label_wins() {
        let config = json!({
            "Labels": {"port": "8000"},
            "ExposedPorts": {"5000/tcp": {}}
        });
        assert_eq!(container_port(&config), Some(8000));
    }

    #[test]
    fn test_first_exposed_port() {
        let config = json!({
            "Labels": null,
            "ExposedPorts": {"9000/tcp": {}, "5000/tcp": {}}
        });
        assert_eq!(container_port(&config), Some(9000));
        assert_eq!(container_port(&json!({})), None);
    }

    #[test]
    fn test_free_local_port_is_bindable() {
        let port = free_local_port().unwrap();
        assert!(port > 0);
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_container_error() {
        let docker = DockerCli::new(&DockerConfig {
            binary: "simlab-no-such-docker".to_string(),
            command_timeout_secs: 5,
        });
        let err = docker.cleanup().await.unwrap_err();
        assert!(matches!(err, SimlabError::Container(_)));
    }
}
