//! Mesh adapter - service mesh lifecycle manager

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use mesh_adapter::cluster::{ClusterClient, KubeClusterClient};
use mesh_adapter::config::{AdapterConfig, ConfigArgs};
use mesh_adapter::dispatcher::{AdapterContext, Dispatcher, OperationRequest};
use mesh_adapter::events::{event_channel, EventKind};
use mesh_adapter::generator::{
    DefaultManifestSource, GenerationMethod, GenerationOutcome, GenerationRequest, Generator,
    ManifestSource,
};
use mesh_adapter::reconciler::DeclarativeRequest;
use mesh_adapter::registrar::{HelmRepoIndex, HttpCapabilityPublisher, Registrar};
use mesh_adapter::registry::{
    GitHubReleaseLister, MeshProfile, RegistryBuilder, SharedRegistry,
};
use mesh_adapter::telemetry::{self, LogFormat};

/// Mesh adapter - installs and manages Open Service Mesh on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "mesh-adapter", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Log output format
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the adapter (default mode)
    ///
    /// Registers pre-generated components, then keeps them in step with
    /// upstream releases until interrupted.
    Serve,

    /// Generate component definitions from a manifest or chart
    Generate(GenerateArgs),

    /// Run one lifecycle operation and stream its events
    Operate(OperateArgs),

    /// Reconcile OAM component/configuration files
    Reconcile(ReconcileArgs),

    /// Print the operation registry as JSON
    Operations,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Manifest URL/path or chart archive
    #[arg(long)]
    url: String,

    /// How to read the source
    #[arg(long, value_enum, default_value = "manifest")]
    method: GenerationMethod,

    /// Mesh version (also the output directory name)
    #[arg(long)]
    version: String,

    /// Components root (defaults to the configured path)
    #[arg(long)]
    path: Option<PathBuf>,

    /// Purge and regenerate an existing directory
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct OperateArgs {
    /// Operation name (see `operations`)
    operation: String,

    /// Target namespace
    #[arg(long, short = 'n', default_value = "")]
    namespace: String,

    /// Remove instead of install
    #[arg(long)]
    delete: bool,

    /// Version override
    #[arg(long)]
    version: Option<String>,

    /// Manifest file for the custom operation
    #[arg(long)]
    body: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    /// Component documents (repeatable)
    #[arg(long = "component", short = 'c')]
    components: Vec<PathBuf>,

    /// Application configuration document
    #[arg(long)]
    configuration: Option<PathBuf>,

    /// Remove instead of apply
    #[arg(long)]
    delete: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    let config = AdapterConfig::load(&cli.config)?;
    let profile = MeshProfile::osm();

    match cli.command {
        Some(Commands::Generate(args)) => run_generate(config, profile, args).await,
        Some(Commands::Operate(args)) => run_operate(config, profile, args).await,
        Some(Commands::Reconcile(args)) => run_reconcile(config, profile, args).await,
        Some(Commands::Operations) => run_operations(config, profile).await,
        Some(Commands::Serve) | None => run_serve(config, profile).await,
    }
}

async fn build_registry(
    config: &AdapterConfig,
    profile: &MeshProfile,
    http: &reqwest::Client,
) -> (Arc<RegistryBuilder>, SharedRegistry) {
    let builder = Arc::new(
        RegistryBuilder::new(
            profile.clone(),
            Arc::new(GitHubReleaseLister::new(http.clone())),
        )
        .with_release_count(config.release_count),
    );
    let registry = SharedRegistry::new(builder.build().await);
    (builder, registry)
}

fn manifest_source(config: &AdapterConfig, http: &reqwest::Client) -> Arc<dyn ManifestSource> {
    Arc::new(DefaultManifestSource::new(http.clone()).with_helm_binary(config.helm_binary.clone()))
}

async fn build_dispatcher(
    config: AdapterConfig,
    profile: MeshProfile,
    registry: SharedRegistry,
    http: &reqwest::Client,
) -> anyhow::Result<(Dispatcher, tokio::sync::mpsc::UnboundedReceiver<mesh_adapter::events::Event>)> {
    let cluster: Arc<dyn ClusterClient> = Arc::new(
        KubeClusterClient::connect(&config.kubeconfig)
            .await?
            .with_helm_binary(config.helm_binary.clone()),
    );
    let source = manifest_source(&config, http);
    let (sink, rx) = event_channel();
    let context = AdapterContext::builder(cluster, source)
        .config(config)
        .profile(profile)
        .sink(Arc::new(sink))
        .build();
    Ok((Dispatcher::new(context, registry), rx))
}

/// Run the adapter until Ctrl-C
async fn run_serve(config: AdapterConfig, profile: MeshProfile) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let (builder, registry) = build_registry(&config, &profile, &http).await;

    let source = manifest_source(&config, &http);
    let registrar = Arc::new(Registrar::new(
        config.clone(),
        profile.clone(),
        Generator::new(source),
        Arc::new(HelmRepoIndex::new(
            http.clone(),
            profile.chart_repository.clone(),
            profile.chart_name.clone(),
        )),
        Arc::new(HttpCapabilityPublisher::new(http.clone(), config.server_url.clone())),
        builder,
        registry.clone(),
    ));

    let pinned = registry
        .snapshot()
        .get(&profile.install_operation)
        .ok()
        .and_then(|op| op.latest_version().map(str::to_string));
    match registrar.register_static(pinned.as_deref()).await {
        Ok((published, failed)) => tracing::info!(
            version = pinned.as_deref().unwrap_or("none"),
            published,
            failed,
            "static capabilities registered"
        ),
        Err(e) => tracing::warn!(error = %e, "static capability registration failed"),
    }

    let task = registrar.start();
    tracing::info!(
        adapter = %config.adapter_address(),
        server = %config.server_url,
        "mesh adapter running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    task.abort();
    Ok(())
}

/// Generate components offline
async fn run_generate(
    config: AdapterConfig,
    profile: MeshProfile,
    args: GenerateArgs,
) -> anyhow::Result<()> {
    let generator = Generator::new(manifest_source(&config, &reqwest::Client::new()));
    let request = GenerationRequest {
        source_url: args.url,
        method: args.method,
        filter: profile.crd_filter.clone(),
        dir_name: args.version.clone(),
        version: args.version,
        base_path: args.path.unwrap_or(config.components_path),
        force: args.force,
        mesh_name: profile.name,
    };

    match generator.generate(&request).await? {
        GenerationOutcome::Skipped { dir } => {
            println!("{} already exists, skipping (use --force to regenerate)", dir.display())
        }
        GenerationOutcome::Generated { dir, kinds } => {
            println!("Generated {} components in {}", kinds.len(), dir.display());
            for kind in kinds {
                println!("  {kind}");
            }
        }
    }
    Ok(())
}

/// Dispatch one operation and print events until the terminal one
async fn run_operate(
    config: AdapterConfig,
    profile: MeshProfile,
    args: OperateArgs,
) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let (_, registry) = build_registry(&config, &profile, &http).await;
    let (dispatcher, mut events) = build_dispatcher(config, profile, registry, &http).await?;

    let mut request = OperationRequest::new(args.operation)
        .in_namespace(args.namespace)
        .deleting(args.delete);
    if let Some(version) = args.version {
        request = request.with_version(version);
    }
    if let Some(path) = args.body {
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        request = request.with_body(body);
    }

    let dispatched = dispatcher.dispatch(request);
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.is_terminal() {
            if event.kind == EventKind::Failed {
                anyhow::bail!("{}: {}", event.summary, event.details);
            }
            break;
        }
    }
    if let Ok(handle) = dispatched {
        handle.wait().await?;
    }
    Ok(())
}

/// Reconcile declarative documents from files
async fn run_reconcile(
    config: AdapterConfig,
    profile: MeshProfile,
    args: ReconcileArgs,
) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let (_, registry) = build_registry(&config, &profile, &http).await;
    let (dispatcher, _events) = build_dispatcher(config, profile, registry, &http).await?;

    let mut components = Vec::with_capacity(args.components.len());
    for path in &args.components {
        components.push(
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?,
        );
    }
    let configuration = match &args.configuration {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?,
        None => String::new(),
    };

    let (summary, err) = dispatcher
        .process_declarative(&DeclarativeRequest {
            components,
            configuration,
            delete: args.delete,
        })
        .await;
    println!("{summary}");
    match err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Print the registry
async fn run_operations(config: AdapterConfig, profile: MeshProfile) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let (_, registry) = build_registry(&config, &profile, &http).await;
    let snapshot = registry.snapshot();
    let operations: Vec<_> = snapshot.operations().collect();
    println!("{}", serde_json::to_string_pretty(&operations)?);
    Ok(())
}
