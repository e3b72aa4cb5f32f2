//! hearth-server entry point: CLI, config file, startup recovery
//! (RDB then AOF), then the accept loop.

mod blocking;
mod commands;
mod config;
mod dispatch;
mod info;
mod journal;
mod server;
mod session;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use hearth_core::Clock;
use hearth_persistence::{load_rdb_file, AofLog};
use hearth_script::ScriptEngine;

use crate::config::ServerConfig;
use crate::dispatch::{execute_to_reply, Ctx};
use crate::session::{Session, Source};
use crate::state::{build_shared, Runtime};

#[derive(Parser, Debug)]
#[command(name = "hearth-server", about = "Redis-wire-compatible in-memory data store")]
struct Cli {
    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind.
    #[arg(long)]
    bind: Option<String>,

    /// Log verbosity: error, warn, info or debug.
    #[arg(long)]
    loglevel: Option<String>,

    /// Working directory for persistence files.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Snapshot filename inside `dir`.
    #[arg(long)]
    dbfilename: Option<String>,

    /// Config file of `key value` lines.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let mut cfg = ServerConfig::default();
    if let Some(path) = &cli.config {
        if let Err(e) = cfg.apply_file(path) {
            eprintln!("bad config file: {e}");
            std::process::exit(1);
        }
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(bind) = cli.bind {
        cfg.bind = bind;
    }
    if let Some(level) = cli.loglevel {
        cfg.log_level = level;
    }
    if let Some(dir) = cli.dir {
        cfg.dir = dir;
    }
    if let Some(dbfilename) = cli.dbfilename {
        cfg.dbfilename = dbfilename;
    }

    let level = match cfg.log_level.as_str() {
        "error" => "error",
        "warn" => "warn",
        "debug" => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hearth={level},hearth_server={level}").into()),
        )
        .init();

    if !cfg.dir.exists() {
        error!(dir = %cfg.dir.display(), "persistence directory does not exist");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    runtime.block_on(async {
        let clock = Arc::new(Clock::new());
        let mut shared = build_shared(&cfg, clock.clone());
        shared.engine = Some(match ScriptEngine::new() {
            Ok(engine) => engine,
            Err(e) => {
                error!(error = %e, "cannot initialize scripting engine");
                std::process::exit(1);
            }
        });
        let rt = Runtime::new(cfg.clone(), shared, clock);

        recover(&rt, &cfg);

        if let Err(e) = server::run(rt).await {
            error!(error = %e, "server terminated");
            std::process::exit(1);
        }
    });
}

/// Startup recovery: snapshot first, then AOF replay through the
/// dispatcher in replay mode.
fn recover(rt: &Arc<Runtime>, cfg: &ServerConfig) {
    {
        let mut shared = rt.lock();
        match load_rdb_file(&mut shared.store, &cfg.rdb_path()) {
            Ok(true) => info!(keys = shared.store.total_keys(), "snapshot restored"),
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, path = %cfg.rdb_path().display(), "cannot load snapshot");
                std::process::exit(1);
            }
        }
    }

    if !cfg.appendonly {
        return;
    }
    let commands = match AofLog::read_all(&cfg.aof_path()) {
        Ok(commands) => commands,
        Err(e) => {
            error!(error = %e, "cannot read append-only file");
            std::process::exit(1);
        }
    };
    if commands.is_empty() {
        return;
    }

    let mut session = Session::new(0);
    let mut shared = rt.lock();
    let mut replayed = 0usize;
    for argv in commands {
        let mut ctx = Ctx {
            rt,
            shared: &mut shared,
            session: &mut session,
            source: Source::AofReplay,
            in_exec: false,
            no_propagate: false,
        };
        let reply = execute_to_reply(&mut ctx, &argv);
        if reply.is_error() {
            warn!(
                command = %String::from_utf8_lossy(&argv[0]),
                "aof replay command failed; continuing"
            );
        } else {
            replayed += 1;
        }
    }
    info!(replayed, "append-only file replayed");
}
