// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::log::dlog;
use clap::{ArgAction, Parser, Subcommand};
use rp_common::log::init_logger;
use rtr::messages::Timers;
use rtr::server::{Server, ServerConfig};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::Builder;
use std::time::Duration;
use tal::cache::CacheConfig;
use tal::pipeline::PipelineConfig;
use vdb::{Db, Retention};

pub const COMPONENT_RELYD: &str = "relyd";
pub const UNIT_DAEMON: &str = "daemon";

mod driver;
mod engine;
mod log;

#[derive(Parser, Debug)]
#[command(version, about = "RPKI relying party validator and RTR server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relyd validator daemon.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Directory containing the trust anchor locator (.tal) files.
    #[arg(long)]
    tal: PathBuf,

    /// Root of the local repository the fetcher maintains.
    #[arg(long, default_value = "/var/cache/relyd")]
    local_repository: PathBuf,

    /// Address to listen on for RTR connections.
    #[arg(long, default_value_t = Ipv6Addr::UNSPECIFIED.into())]
    server_address: IpAddr,

    /// Port to listen on for RTR connections.
    #[arg(long, default_value_t = rtr::RTR_PORT)]
    server_port: u16,

    /// Accept backlog for the RTR listener.
    #[arg(long, default_value_t = 10)]
    server_backlog: i32,

    /// Socket write timeout, and the bound on a stalled mid-PDU read, in
    /// seconds.
    #[arg(long, default_value_t = 30)]
    server_io_timeout: u64,

    /// Seconds between validation cycles.
    #[arg(long, default_value_t = 3600)]
    validation_interval: u32,

    /// Refresh interval advertised to routers, seconds.
    #[arg(long, default_value_t = 3600)]
    interval_refresh: u32,

    /// Retry interval advertised to routers, seconds.
    #[arg(long, default_value_t = 600)]
    interval_retry: u32,

    /// Expire interval advertised to routers, seconds. Also bounds how
    /// long deltas are retained.
    #[arg(long, default_value_t = 7200)]
    interval_expire: u32,

    /// Maximum number of retained deltas.
    #[arg(long, default_value_t = vdb::DEFAULT_MAX_DELTAS)]
    max_deltas: usize,

    /// Try each TAL's URIs in random order.
    #[arg(long, default_value_t = false)]
    shuffle_tal_uris: bool,

    /// Consider rsync URIs.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    rsync_enabled: bool,

    /// Consider https (RRDP) URIs.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    rrdp_enabled: bool,

    /// Never request fetches; validate from cached copies only.
    #[arg(long, default_value_t = false)]
    work_offline: bool,

    /// External object validation engine executable.
    #[arg(long)]
    validator_program: Option<PathBuf>,
}

fn main() {
    let args = Cli::parse();
    match args.command {
        Commands::Run(run_args) => run(run_args),
    }
}

fn run(args: RunArgs) {
    if let Err(msg) = validate_intervals(&args) {
        eprintln!("relyd: invalid configuration: {msg}");
        std::process::exit(1);
    }

    let log = init_logger();
    dlog!(log, info, "starting relyd";
        "tal_dir" => args.tal.display().to_string(),
        "local_repository" => args.local_repository.display().to_string()
    );

    let db = Db::new(
        Retention {
            max_age: chrono::Duration::seconds(args.interval_expire as i64),
            max_count: args.max_deltas,
        },
        log.clone(),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let server = Arc::new(Server::new(
        db.clone(),
        ServerConfig {
            bind_addr: SocketAddr::new(
                args.server_address,
                args.server_port,
            ),
            backlog: args.server_backlog,
            timers: Timers {
                refresh: args.interval_refresh,
                retry: args.interval_retry,
                expire: args.interval_expire,
            },
            io_timeout: Duration::from_secs(args.server_io_timeout),
        },
        shutdown.clone(),
        log.clone(),
    ));

    {
        let shutdown = shutdown.clone();
        let log = log.clone();
        ctrlc::set_handler(move || {
            dlog!(log, info, "termination signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("set termination handler");
    }

    let walker = Arc::new(engine::CommandEngine::new(
        args.validator_program.clone(),
        log.clone(),
    ));

    let driver_config = driver::DriverConfig {
        validation_interval: Duration::from_secs(
            args.validation_interval as u64,
        ),
        pipeline: PipelineConfig {
            tal_dir: args.tal.clone(),
            cache: CacheConfig {
                local_repository: args.local_repository.clone(),
                rsync_enabled: args.rsync_enabled,
                rrdp_enabled: args.rrdp_enabled,
                offline: args.work_offline,
            },
            shuffle_uris: args.shuffle_tal_uris,
        },
    };

    let (started_tx, started_rx) = channel();
    let driver_handle = {
        let db = db.clone();
        let server = server.clone();
        let shutdown = shutdown.clone();
        let log = log.clone();
        Builder::new()
            .name("driver".to_string())
            .spawn(move || {
                driver::run(
                    driver_config,
                    db,
                    walker,
                    server,
                    shutdown,
                    started_tx,
                    log,
                )
            })
            .expect("start validation driver")
    };

    // The listener starts accepting once the first validation cycle is
    // underway. Until that cycle installs, queries are answered with No
    // Data Available.
    if started_rx.recv().is_ok() {
        let listener = server.bind().expect("bind rtr listener");
        server.run(listener);
    }

    driver_handle.join().expect("join validation driver");
    dlog!(log, info, "clean shutdown");
}

fn validate_intervals(args: &RunArgs) -> Result<(), String> {
    // Ranges per RFC 8210 §6.
    if !(1..=86400).contains(&args.interval_refresh) {
        return Err(format!(
            "refresh interval {} out of range [1, 86400]",
            args.interval_refresh
        ));
    }
    if !(1..=7200).contains(&args.interval_retry) {
        return Err(format!(
            "retry interval {} out of range [1, 7200]",
            args.interval_retry
        ));
    }
    if !(600..=172800).contains(&args.interval_expire) {
        return Err(format!(
            "expire interval {} out of range [600, 172800]",
            args.interval_expire
        ));
    }
    if args.interval_expire <= args.interval_refresh
        || args.interval_expire <= args.interval_retry
    {
        return Err(
            "expire interval must exceed both refresh and retry".into()
        );
    }
    if args.validation_interval < 60 {
        return Err(format!(
            "validation interval {} below minimum of 60",
            args.validation_interval
        ));
    }
    Ok(())
}
