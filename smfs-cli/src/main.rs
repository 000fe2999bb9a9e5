//! SMFS command-line interface.
//!
//! Parses arguments, initializes logging, wires the engine together
//! (catalog, streaming client, refresh controller), mounts the FUSE
//! tree, and coordinates shutdown on SIGINT or a `shutdown` frame from
//! the catalog service.

mod error;

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser, ValueEnum};
use tracing::{info, warn};

use smfs::catalog::Catalog;
use smfs::config::{LogLevel, Settings};
use smfs::ops::FsOps;
use smfs::refresh::{RefreshController, TcpRefreshChannel};
use smfs::shutdown::ShutdownCoordinator;
use smfs::source::{CatalogSource, RestCatalogSource};
use smfs::storage::CacheDir;
use smfs::stream::{ReqwestStreamingClient, StreamingClient};
use smfs::{fuse, logging};

use error::CliError;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Trace => LogLevel::Trace,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Fatal => LogLevel::Fatal,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "smfs", version = smfs::VERSION, about = "Mount a remote media catalog as a filesystem")]
struct Cli {
    /// Catalog service host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Catalog service port
    #[arg(long, default_value_t = 7095)]
    port: u16,

    /// API key for the catalog service
    #[arg(long = "apikey", default_value = "")]
    api_key: String,

    /// FUSE mount point
    #[arg(long = "mount", default_value = "/mnt/smfs")]
    mount_point: PathBuf,

    /// Storage directory for user-created files
    #[arg(long = "storage-dir", default_value = "/tmp/smfs_storage")]
    storage_dir: PathBuf,

    /// Profile filter passed through to the catalog service
    #[arg(long = "stream-group-profile-ids", default_value = "0")]
    stream_group_profile_ids: String,

    /// Request the short catalog form
    #[arg(long = "is-short", default_value_t = true, action = ArgAction::Set)]
    is_short: bool,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "info")]
    log_level: LogLevelArg,

    /// Shorthand for --log-level debug
    #[arg(long)]
    debug: bool,

    /// Log file path
    #[arg(long = "log-file", default_value = "logs/smfs.log")]
    log_file: PathBuf,

    /// Expose .ts files in directory listings
    #[arg(long = "enable-ts", num_args = 0..=1, default_missing_value = "true")]
    enable_ts: Option<bool>,

    /// Expose .strm files in directory listings
    #[arg(long = "enable-strm", num_args = 0..=1, default_missing_value = "true")]
    enable_strm: Option<bool>,

    /// Expose .m3u files in directory listings
    #[arg(long = "enable-m3u", num_args = 0..=1, default_missing_value = "true")]
    enable_m3u: Option<bool>,

    /// Expose .xml files in directory listings
    #[arg(long = "enable-xml", num_args = 0..=1, default_missing_value = "true")]
    enable_xml: Option<bool>,
}

impl Cli {
    fn enabled_types(&self) -> HashSet<String> {
        let mut types = Settings::default_enabled_types();
        let toggles = [
            ("ts", self.enable_ts),
            ("strm", self.enable_strm),
            ("m3u", self.enable_m3u),
            ("xml", self.enable_xml),
        ];
        for (name, toggle) in toggles {
            match toggle {
                Some(true) => {
                    types.insert(name.to_string());
                }
                Some(false) => {
                    types.remove(name);
                }
                None => {}
            }
        }
        types
    }

    fn into_settings(self) -> Settings {
        let enabled_types = self.enabled_types();
        let log_level = if self.debug {
            LogLevel::Debug
        } else {
            self.log_level.into()
        };
        Settings {
            host: self.host,
            port: self.port,
            api_key: self.api_key,
            mount_point: self.mount_point,
            cache_dir: self.storage_dir,
            stream_group_profile_ids: self.stream_group_profile_ids,
            is_short: self.is_short,
            enabled_types,
            log_level,
            log_file: self.log_file,
            ..Settings::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.into_settings()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("smfs: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(settings: Settings) -> Result<(), CliError> {
    let _logging = logging::init_logging(&settings.log_file, settings.log_level, true)
        .map_err(CliError::Logging)?;
    info!("smfs v{} starting", smfs::VERSION);
    for file_type in &settings.enabled_types {
        info!(file_type = %file_type, "enabled file type");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let coordinator = ShutdownCoordinator::new();
    let shutdown = coordinator.flag();
    let catalog = Arc::new(Catalog::new(settings.enabled_types.clone()));
    let client: Arc<dyn StreamingClient> = Arc::new(ReqwestStreamingClient::new()?);
    let source: Arc<dyn CatalogSource> = Arc::new(RestCatalogSource::new(&settings)?);
    let storage = CacheDir::new(&settings.cache_dir);
    let ops = Arc::new(
        FsOps::new(
            Arc::clone(&catalog),
            storage,
            client,
            shutdown.clone(),
        )
        .with_pipe_capacity(settings.pipe_capacity),
    );

    // initial listing before the mount goes live; the controller keeps it
    // fresh from here on
    let controller = RefreshController::new(Arc::clone(&catalog), source, shutdown.clone());
    controller.reload();
    let channel = Box::new(TcpRefreshChannel::new(&settings.host, settings.port));
    let refresh_thread = controller.spawn(channel).map_err(CliError::Refresh)?;

    let session = fuse::mount(
        Arc::clone(&ops),
        runtime.handle().clone(),
        &settings.mount_point,
    )
    .map_err(CliError::Mount)?;
    info!(mount = %settings.mount_point.display(), "filesystem mounted");

    {
        let shutdown = shutdown.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                shutdown.trigger();
            }
        });
    }

    coordinator.wait();

    // teardown order: drain streams, stop the controller, unmount, then
    // let the runtime wind down its workers
    coordinator.drain(&catalog);
    if refresh_thread.join().is_err() {
        warn!("refresh controller panicked");
    }
    drop(session);
    info!("smfs exited cleanly");
    Ok(())
}
