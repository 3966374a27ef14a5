//! Deployment collaborator: the service that actually starts and stops a
//! workload container on a remote node.
//!
//! The controller only sees the `Deployment` trait; the bollard-backed
//! implementation talks to each node's Docker daemon over the overlay
//! network. Calls may be slow and may fail — failures surface as errors,
//! never as silent defaults.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use dashmap::DashMap;
use futures_util::StreamExt;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub address: String,
    pub container_name: String,
    pub image: String,
    pub cpu: u32,
    pub memory_gb: u32,
    pub port: u16,
    /// Host path to mount at /workspace for persistent user data.
    pub volume_hint: Option<String>,
    pub env: HashMap<String, String>,
}

#[async_trait]
pub trait Deployment: Send + Sync {
    /// Starts the workload and returns an opaque deployment handle.
    async fn deploy(&self, request: &DeployRequest) -> Result<String>;
    async fn stop(&self, address: &str, handle: &str) -> Result<()>;
    async fn start(&self, address: &str, handle: &str) -> Result<()>;
    async fn remove(&self, address: &str, handle: &str) -> Result<()>;
}

/// Remote-Docker deployment over HTTP, one cached client per node address.
pub struct DockerDeployer {
    docker_port: u16,
    clients: DashMap<String, Docker>,
}

impl DockerDeployer {
    pub fn new(docker_port: u16) -> Self {
        Self {
            docker_port,
            clients: DashMap::new(),
        }
    }

    fn client(&self, address: &str) -> Result<Docker> {
        if let Some(client) = self.clients.get(address) {
            return Ok(client.clone());
        }
        let url = format!("http://{address}:{}", self.docker_port);
        let docker = Docker::connect_with_http(&url, 60, bollard::API_DEFAULT_VERSION)?;
        self.clients.insert(address.to_string(), docker.clone());
        Ok(docker)
    }

    /// Pulls the image on the target daemon, draining the progress stream.
    async fn pull_image(&self, docker: &Docker, image: &str) -> Result<()> {
        let mut progress = docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(update) = progress.next().await {
            let update = update?;
            if let Some(status) = update.status {
                debug!(image, status = %status, "image pull progress");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Deployment for DockerDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<String> {
        let docker = self.client(&request.address)?;
        info!(
            address = %request.address,
            image = %request.image,
            port = request.port,
            "deploying container {}",
            request.container_name
        );
        self.pull_image(&docker, &request.image).await?;

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let container_port = format!("{}/tcp", request.port);
        let port_bindings = HashMap::from([(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(request.port.to_string()),
            }]),
        )]);
        let binds = request
            .volume_hint
            .as_ref()
            .map(|hint| vec![format!("{hint}:/workspace")]);

        let host_config = HostConfig {
            nano_cpus: Some(request.cpu as i64 * 1_000_000_000),
            memory: Some(request.memory_gb as i64 * 1024 * 1024 * 1024),
            port_bindings: Some(port_bindings),
            binds,
            init: Some(true),
            ..Default::default()
        };
        let config = Config {
            image: Some(request.image.clone()),
            env: Some(env),
            tty: Some(true),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            exposed_ports: Some(HashMap::from([(container_port, HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: request.container_name.clone(),
            platform: None,
        };

        let created = docker.create_container(Some(options), config).await?;
        docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(created.id)
    }

    async fn stop(&self, address: &str, handle: &str) -> Result<()> {
        let docker = self.client(address)?;
        docker.stop_container(handle, None).await?;
        Ok(())
    }

    async fn start(&self, address: &str, handle: &str) -> Result<()> {
        let docker = self.client(address)?;
        docker
            .start_container(handle, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove(&self, address: &str, handle: &str) -> Result<()> {
        let docker = self.client(address)?;
        docker
            .remove_container(
                handle,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}
