//! Adapter configuration
//!
//! Settings come from three layers, later layers winning: built-in defaults,
//! an optional YAML file (`MESH_ADAPTER_CONFIG`), and command-line flags or
//! their environment variables. Anything unreadable or invalid is an
//! [`Error::Config`] and fatal at startup.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::{Error, DEFAULT_ADAPTER_PORT};

/// Default capability registry server
pub const DEFAULT_SERVER: &str = "http://localhost:9081";

/// Default host advertised to the capability registry
pub const DEFAULT_ADAPTER_HOST: &str = "mesherylocal.layer5.io";

/// Default location of the conformance suite manifest
pub const DEFAULT_CONFORMANCE_MANIFEST: &str =
    "https://raw.githubusercontent.com/layer5io/learn-layer5/master/smi-conformance/manifest.yml";

/// Connection flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Capability registry server (scheme optional)
    #[arg(long, env = "MESHERY_SERVER")]
    pub server: Option<String>,

    /// Host name this adapter is reachable at
    #[arg(long, env = "SERVICE_ADDR")]
    pub service_addr: Option<String>,

    /// Port this adapter is reachable at
    #[arg(long, env = "ADAPTER_PORT")]
    pub port: Option<u16>,

    /// Kubeconfig file(s) to use instead of the ambient one; a list uses the
    /// platform path separator, as `KUBECONFIG` does
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<OsString>,

    /// Helm binary used to render charts
    #[arg(long = "helm", env = "HELM_BINARY")]
    pub helm_binary: Option<PathBuf>,

    /// YAML file with adapter settings
    #[arg(long = "config", env = "MESH_ADAPTER_CONFIG")]
    pub config_file: Option<PathBuf>,
}

/// On-disk settings; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    server: Option<String>,
    service_addr: Option<String>,
    port: Option<u16>,
    components_path: Option<PathBuf>,
    helm_binary: Option<PathBuf>,
    registrar_interval_secs: Option<u64>,
    generation_timeout_secs: Option<u64>,
    conformance_manifest: Option<String>,
    release_count: Option<usize>,
}

/// Resolved adapter settings
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Capability registry base URL (always carries a scheme)
    pub server_url: String,
    /// Host advertised to the registry
    pub adapter_host: String,
    /// Port advertised to the registry
    pub adapter_port: u16,
    /// Kubeconfig files merged in order; empty means the ambient config
    pub kubeconfig: Vec<PathBuf>,
    /// Helm binary used to render charts
    pub helm_binary: PathBuf,
    /// Root directory for generated components
    pub components_path: PathBuf,
    /// Time between registrar iterations
    pub registrar_interval: Duration,
    /// Budget for version discovery plus regeneration in one iteration
    pub generation_timeout: Duration,
    /// Manifest handed to the conformance runner
    pub conformance_manifest: String,
    /// Number of upstream releases offered per operation
    pub release_count: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER.to_string(),
            adapter_host: DEFAULT_ADAPTER_HOST.to_string(),
            adapter_port: DEFAULT_ADAPTER_PORT,
            kubeconfig: Vec::new(),
            helm_binary: PathBuf::from("helm"),
            components_path: PathBuf::from("templates/oam/workloads"),
            registrar_interval: Duration::from_secs(24 * 60 * 60),
            generation_timeout: Duration::from_secs(60 * 60),
            conformance_manifest: DEFAULT_CONFORMANCE_MANIFEST.to_string(),
            release_count: 3,
        }
    }
}

impl AdapterConfig {
    /// Resolve settings from flags/env and the optional config file
    pub fn load(args: &ConfigArgs) -> Result<Self, Error> {
        let file = match &args.config_file {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        Self::default().merge(file, args)
    }

    fn merge(mut self, file: FileConfig, args: &ConfigArgs) -> Result<Self, Error> {
        if let Some(server) = args.server.clone().or(file.server) {
            self.server_url = normalize_server_url(&server)?;
        }
        if let Some(host) = args.service_addr.clone().or(file.service_addr) {
            if host.trim().is_empty() {
                return Err(Error::config("service address must not be empty"));
            }
            self.adapter_host = host.trim().to_string();
        }
        if let Some(port) = args.port.or(file.port) {
            if port == 0 {
                return Err(Error::config("adapter port must be non-zero"));
            }
            self.adapter_port = port;
        }
        if let Some(path) = file.components_path {
            self.components_path = path;
        }
        if let Some(secs) = file.registrar_interval_secs {
            if secs == 0 {
                return Err(Error::config("registrarIntervalSecs must be non-zero"));
            }
            self.registrar_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.generation_timeout_secs {
            if secs == 0 {
                return Err(Error::config("generationTimeoutSecs must be non-zero"));
            }
            self.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(manifest) = file.conformance_manifest {
            self.conformance_manifest = manifest;
        }
        if let Some(count) = file.release_count {
            self.release_count = count;
        }
        if let Some(helm) = args.helm_binary.clone().or(file.helm_binary) {
            self.helm_binary = helm;
        }
        if let Some(raw) = &args.kubeconfig {
            self.kubeconfig = split_kubeconfig(raw);
        }
        Ok(self)
    }

    /// `host:port` the registry uses to reach this adapter
    pub fn adapter_address(&self) -> String {
        format!("{}:{}", self.adapter_host, self.adapter_port)
    }

    /// Directory holding components generated for `version`
    pub fn components_dir(&self, version: &str) -> PathBuf {
        self.components_path.join(version)
    }
}

fn split_kubeconfig(raw: &OsStr) -> Vec<PathBuf> {
    std::env::split_paths(raw)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn read_file_config(path: &Path) -> Result<FileConfig, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&content)
        .map_err(|e| Error::config(format!("invalid config file {}: {e}", path.display())))
}

/// Add an `http://` scheme when missing and strip trailing slashes
pub fn normalize_server_url(raw: &str) -> Result<String, Error> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::config("server address must not be empty"));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("http://{trimmed}"))
    }
}
