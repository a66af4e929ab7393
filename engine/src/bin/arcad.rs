#[macro_use]
extern crate tracing;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;

use arca_engine::{
    core::{ContainerCoreBuilder, CoreOptions},
    guest::TonicGuestGateway,
    logger,
    network::{
        NetworkCore,
        NetworkDriver,
        NullDriver,
        VmnetDriver,
        WireGuardDriver,
    },
    stdio::LogFanout,
    store::StateStore,
    subsys::{DaemonConfig, LocalImageStore, LocalVolumeStore},
    vm::{ProcessVmLauncher, VmRegistry},
    VerboseError,
};

#[derive(Debug, Parser)]
#[clap(name = "arcad", version, about = "arca container daemon")]
struct ArcadCliArgs {
    /// Path of the daemon config file.
    #[clap(short = 'c', long, default_value = "/etc/arca/arcad.yaml")]
    config: PathBuf,
    /// Override the state root from the config file.
    #[clap(long)]
    data_root: Option<PathBuf>,
    /// Path of the per-container VMM helper binary.
    #[clap(long, default_value = "arca-vmm")]
    vmm: PathBuf,
    /// Log level when RUST_LOG is not set.
    #[clap(short = 'l', long, default_value = "info")]
    log_level: logger::LogLevel,
}

#[tokio::main]
async fn main() {
    let args = ArcadCliArgs::parse();
    logger::init(args.log_level);

    if let Err(error) = run(args).await {
        error!("arcad failed: {error}");
        std::process::exit(1);
    }
}

async fn run(args: ArcadCliArgs) -> Result<(), String> {
    let mut config = DaemonConfig::from_file(&args.config)?;
    if let Some(root) = args.data_root {
        config.data_root = root;
    }
    info!(
        data_root = %config.data_root.display(),
        kernel = %config.kernel().display(),
        "starting arcad"
    );

    for dir in [
        config.data_root.clone(),
        config.log_root(),
        config.image_root(),
        config.rootfs_root(),
        config.volume_root(),
    ] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    }

    let store = Arc::new(
        StateStore::open(&config.db_path()).map_err(|e| e.verbose())?,
    );
    let vms = VmRegistry::new();
    let guests = TonicGuestGateway::new(Duration::from_secs(
        config.guest_timeout_secs,
    ));

    let wireguard =
        WireGuardDriver::new(store.clone(), vms.clone(), guests.clone());
    let mut drivers: Vec<Arc<dyn NetworkDriver>> = Vec::new();
    drivers.push(wireguard);
    drivers.push(Arc::new(VmnetDriver));
    drivers.push(Arc::new(NullDriver));
    let network = NetworkCore::new(store.clone(), vms.clone(), drivers);
    network.init().await.map_err(|e| e.verbose())?;

    let images = Arc::new(LocalImageStore::new(
        config.image_root(),
        config.rootfs_root(),
    ));
    let volumes = Arc::new(LocalVolumeStore::new(config.volume_root()));
    let fanout = Arc::new(LogFanout::new(config.log_root()));
    let launcher = Arc::new(ProcessVmLauncher::new(
        args.vmm,
        config.data_root.join("vsock"),
    ));

    let core = ContainerCoreBuilder::new(
        store,
        images,
        volumes,
        network,
        launcher,
        guests,
        fanout,
        vms,
    )
    .with_options(CoreOptions {
        kernel_path: config.kernel(),
        platform: config.platform.clone(),
        stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        ..CoreOptions::default()
    })
    .build();

    core.recover().await.map_err(|e| e.verbose())?;
    core.apply_restart_policies().await;
    info!("arcad ready");

    wait_for_shutdown_signal().await;
    info!("shutting down");
    core.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            error!(%error, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
