//! Fuzz filesystem daemon.
//!
//! Mounts an empty fuzz filesystem and serves it until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! fuzzfs --mount-point /mnt/fuzz
//! fuzzfs -m /mnt/fuzz --seed 42 --batch-size 100 --threads 8
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;

use clap::Parser;
use fuse_backend_rs::api::server::Server;
use fuse_backend_rs::transport::Error as TransportError;
use fuse_backend_rs::transport::FuseChannel;
use fuse_backend_rs::transport::FuseSession;
use fuse_backend_rs::transport::Writer;
use fuzzfs::FsConfig;
use fuzzfs::FuzzFs;
use fuzzfs::MutatorRegistry;
use fuzzfs::constants::DEFAULT_BATCH_SIZE;
use fuzzfs::constants::MAX_BATCH_SIZE;
use fuzzfs::mutator::BIT_FLIP;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Number of threads for FUSE request handling.
const FUSE_THREADS: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "fuzzfs")]
#[command(about = "Mount a filesystem that serves bit-flip mutants of seed files")]
struct Args {
    /// Mount point path.
    #[arg(long, short)]
    mount_point: PathBuf,

    /// Seed for the mutation random number generators.
    #[arg(long, short, default_value_t = 0, allow_negative_numbers = true)]
    seed: i64,

    /// Number of mutants generated per `mutate` trigger.
    #[arg(long, short, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u32,

    /// Mutation strategy used by new seeds.
    #[arg(long, default_value = BIT_FLIP)]
    strategy: String,

    /// Filesystem name for mount.
    #[arg(long, default_value = "FuzzFileSystem")]
    fsname: String,

    /// Filesystem subtype for mount.
    #[arg(long, default_value = "ffs")]
    subtype: String,

    /// Number of threads for handling FUSE requests.
    #[arg(long, default_value_t = FUSE_THREADS)]
    threads: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// Check flag combinations clap cannot express.
fn validate(args: &Args, registry: &MutatorRegistry) -> Result<(), String> {
    if args.batch_size > MAX_BATCH_SIZE {
        return Err(format!("--batch-size must be at most {MAX_BATCH_SIZE}"));
    }
    if !registry.contains(&args.strategy) {
        let known: Vec<&str> = registry.names().collect();
        return Err(format!("unknown strategy {:?}, expected one of {:?}", args.strategy, known));
    }
    if args.threads == 0 {
        return Err("--threads must be at least 1".to_string());
    }
    Ok(())
}

fn main() {
    init_tracing();

    let args = Args::parse();
    let registry = MutatorRegistry::new();

    if let Err(reason) = validate(&args, &registry) {
        error!("{reason}");
        std::process::exit(1);
    }

    let config = FsConfig {
        seed: args.seed,
        batch_size: args.batch_size,
        strategy: args.strategy.clone(),
    };

    // SAFETY: getuid() and getgid() are POSIX syscalls that return the real
    // user/group ID. They have no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    let fs = FuzzFs::with_registry(uid, gid, config, registry);
    run_fuse(args, fs);
}

/// Whether a dispatch error means the kernel has gone away.
fn reply_channel_closed(err: &fuse_backend_rs::Error) -> bool {
    matches!(err, fuse_backend_rs::Error::EncodeMessage(io) if io.raw_os_error() == Some(libc::EBADF))
}

/// Whether a receive error means the session was torn down.
fn session_closed(err: &TransportError) -> bool {
    matches!(err, TransportError::SessionFailure(msg) if msg.contains("closed") || msg.contains("shutdown"))
}

/// Answer requests arriving on `channel` until the session goes away.
fn serve(server: &Server<FuzzFs>, channel: &mut FuseChannel, worker: usize) {
    loop {
        let (reader, writer) = match channel.get_request() {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) if session_closed(&e) => break,
            Err(e) => {
                warn!(worker, error = ?e, "receiving request failed");
                continue;
            }
        };

        match server.handle_message(reader, Writer::FuseDev(writer), None, None) {
            Ok(_) => {}
            Err(e) if reply_channel_closed(&e) => break,
            Err(e) => warn!(worker, error = ?e, "request failed"),
        }
    }
    debug!(worker, "worker stopped");
}

/// Start up to `count` workers, each with its own channel on `session`.
fn spawn_workers(server: &Arc<Server<FuzzFs>>, session: &mut FuseSession, count: usize) -> Vec<JoinHandle<()>> {
    let mut workers = Vec::with_capacity(count);
    for worker in 0..count {
        let mut channel = match session.new_channel() {
            Ok(channel) => channel,
            Err(e) => {
                error!(worker, error = %e, "cannot open channel");
                continue;
            }
        };
        let server = Arc::clone(server);
        let spawned = thread::Builder::new()
            .name(format!("fuzzfs-{worker}"))
            .spawn(move || serve(&server, &mut channel, worker));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => error!(worker, error = %e, "cannot spawn worker"),
        }
    }
    workers
}

/// Block until Ctrl-C.
fn wait_for_interrupt() {
    let (tx, rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        error!(error = %e, "cannot install Ctrl-C handler");
    }
    let _ = rx.recv();
}

fn run_fuse(args: Args, fs: FuzzFs) {
    info!(
        mount_point = %args.mount_point.display(),
        fsname = %args.fsname,
        subtype = %args.subtype,
        seed = args.seed,
        batch_size = args.batch_size,
        threads = args.threads,
        "mounting fuzz filesystem"
    );

    let mut session = match FuseSession::new(&args.mount_point, &args.fsname, &args.subtype, false) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "cannot create session");
            std::process::exit(1);
        }
    };
    if let Err(e) = session.mount() {
        error!(error = %e, "mount failed");
        std::process::exit(1);
    }

    let server = Arc::new(Server::new(fs));
    let workers = spawn_workers(&server, &mut session, args.threads);
    if workers.is_empty() {
        error!("no workers running");
        if let Err(e) = session.umount() {
            error!(error = %e, "unmount failed");
        }
        std::process::exit(1);
    }
    info!(workers = workers.len(), "serving, Ctrl-C unmounts");

    wait_for_interrupt();

    // Workers see the session close once it is unmounted
    if let Err(e) = session.umount() {
        error!(error = %e, "unmount failed");
    }
    for worker in workers {
        let _ = worker.join();
    }
    info!("unmounted");
}
