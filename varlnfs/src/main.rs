use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use daemonize::{Daemonize, Outcome};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::{error, info, warn};

use varlnfs::args::Args;
use varlnfs::fs::VarlnFs;
use varlnfs::fuse::mount::{MountConfig, mount_fs};
use varlnfs::logging;

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.debug, args.foreground());
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("varlnfs: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let base = existing_dir(&args.base_dir).context("Invalid base directory")?;
    let mountpoint = existing_dir(&args.mountpoint).context("Invalid mount point")?;

    // Daemonizing forks, so it has to happen before the runtime starts.
    let ready = if args.foreground() {
        None
    } else {
        match detach()? {
            Detached::Parent => return Ok(()),
            Detached::Daemon(ready) => Some(ready),
        }
    };

    let fs = VarlnFs::new(&base).ttl(Duration::from_secs(args.ttl));
    let config = args.mount_config();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(serve(fs, mountpoint, config, ready))
}

enum Detached {
    Parent,
    Daemon(Ready),
}

/// Write end of the readiness pipe, held by the daemon until it has mounted.
struct Ready(File);

impl Ready {
    fn notify(mut self) {
        if let Err(e) = self.0.write_all(&[1]) {
            warn!("Could not report readiness to the parent process: {e}");
        }
    }
}

/// Fork into the background.
///
/// The parent only returns once the daemon has mounted, and fails when the
/// daemon exits before that, so the exit status reflects startup errors.
fn detach() -> Result<Detached> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC).context("Failed to create readiness pipe")?;
    match Daemonize::new().working_directory("/").execute() {
        Outcome::Parent(res) => {
            let parent = res.context("Failed to daemonize")?;
            drop(write);
            if parent.first_child_exit_code != 0 {
                bail!(
                    "Failed to daemonize: child exited with status {}",
                    parent.first_child_exit_code
                );
            }
            wait_for_daemon(File::from(read))?;
            Ok(Detached::Parent)
        }
        Outcome::Child(res) => {
            res.context("Failed to daemonize")?;
            drop(read);
            Ok(Detached::Daemon(Ready(File::from(write))))
        }
    }
}

fn wait_for_daemon(mut read: File) -> Result<()> {
    let mut byte = [0u8; 1];
    match read.read_exact(&mut byte) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            bail!("The daemon exited before the mount was ready, see the system log")
        }
        Err(e) => Err(e).context("Failed to wait for the daemon"),
    }
}

fn existing_dir(path: &Path) -> Result<PathBuf> {
    let resolved = path
        .canonicalize()
        .with_context(|| format!("Could not resolve {}", path.display()))?;
    if !resolved.is_dir() {
        bail!("{} is not a directory", resolved.display());
    }
    Ok(resolved)
}

async fn serve(
    fs: VarlnFs,
    mountpoint: PathBuf,
    config: MountConfig,
    ready: Option<Ready>,
) -> Result<()> {
    let mut mount_handle = mount_fs(fs, &mountpoint, &config)
        .await
        .with_context(|| format!("Failed to mount on {}", mountpoint.display()))?;
    if let Some(ready) = ready {
        ready.notify();
    }
    let mut terminate = unix_signal(SignalKind::terminate()).context("Failed to watch SIGTERM")?;

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => {
            res.context("FUSE session failed")?;
            info!("{} was unmounted", mountpoint.display());
        },
        _ = signal::ctrl_c() => {
            info!("Interrupted, unmounting {}", mountpoint.display());
            mount_handle.unmount().await.context("Failed to unmount")?;
        },
        _ = terminate.recv() => {
            info!("Terminated, unmounting {}", mountpoint.display());
            mount_handle.unmount().await.context("Failed to unmount")?;
        },
    }
    Ok(())
}
