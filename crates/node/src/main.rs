use std::env;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process;
use std::thread;

use clap::{value_parser, Arg, Command};
use lansync_config::{ANY_ADDR, DEFAULT_PORT};
use lansync_core::utils::Logger;
use lansync_node::{discovery, session, shell, NodeContext};

static LOGGER: Logger = Logger::verbose("Main");

fn create_command() -> Command {
    Command::new("lansync")
        .about("Peer-to-peer LAN folder synchronization")
        .arg(
            Arg::new("FOLDER")
                .help("Folder to keep in sync")
                .short('f')
                .long("folder")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("PORT")
                .help("TCP port for the peer listener")
                .short('p')
                .long("port")
                .value_name("N")
                .value_parser(value_parser!(u16))
                .default_value("9000"),
        )
        .arg(
            Arg::new("PEER")
                .help("Seed one connection in addition to discovery")
                .long("peer")
                .value_name("HOST:PORT"),
        )
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| String::from("node"))
}

fn main() {
    let matches = create_command().get_matches();

    let folder = match matches.get_one::<String>("FOLDER") {
        Some(f) => PathBuf::from(f),
        None => {
            LOGGER.error("Need --folder");
            process::exit(1);
        }
    };
    let port = *matches.get_one::<u16>("PORT").unwrap_or(&DEFAULT_PORT);
    let seed_peer = matches.get_one::<String>("PEER").cloned();

    let device_id = format!("{}-{}", hostname(), port);
    let ctx = match NodeContext::new(device_id, folder) {
        Ok(ctx) => ctx,
        Err(e) => {
            LOGGER.error(format!("startup failed: {}", e));
            process::exit(1);
        }
    };

    // Our own index is peer number one in the network state.
    match ctx.indexer.scan() {
        Ok(files) => ctx.state.update_peer(&ctx.device_id, files),
        Err(e) => LOGGER.error(format!("initial scan failed: {}", e)),
    }

    let listener = match TcpListener::bind((ANY_ADDR, port)) {
        Ok(l) => l,
        Err(e) => {
            LOGGER.error(format!("bind :{} failed: {}", port, e));
            process::exit(1);
        }
    };
    LOGGER.info(format!("Starting {} on :{}", ctx.device_id, port));

    {
        let ctx = ctx.clone();
        thread::spawn(move || session::serve(ctx, listener));
    }
    thread::spawn(move || {
        if let Err(e) = discovery::run_beacon(port) {
            LOGGER.error(format!("beacon stopped: {}", e));
        }
    });
    {
        let ctx = ctx.clone();
        thread::spawn(move || {
            let dial_ctx = ctx.clone();
            discovery::run_listener(move |addr| session::dial(dial_ctx.clone(), addr));
        });
    }
    if let Some(addr) = seed_peer {
        session::dial(ctx.clone(), addr);
    }

    // The shell owns the foreground; when it returns the process is done and
    // the background threads go with it.
    if let Err(e) = shell::run_shell(&ctx) {
        LOGGER.error(format!("shell failed: {}", e));
        process::exit(1);
    }
}
