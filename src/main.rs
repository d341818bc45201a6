use std::{env, io::Error, process::exit};

use args::{ArgumentsRequest, StartupArguments, StartupMode};
use mole_proto::crypto::SharedKey;
use tracing::{error, info};

use crate::{acceptor::SessionKind, session::SessionConfig};

mod acceptor;
mod args;
mod egress;
mod ingress;
mod logging;
mod relay;
mod resolver;
mod session;

fn main() {
    let arguments = match args::parse_arguments(env::args()) {
        Err(err) => {
            eprintln!("{err}\n\n{}", args::get_help_string());
            exit(1);
        }
        Ok(arguments) => arguments,
    };

    let startup_args = match arguments {
        ArgumentsRequest::Version => {
            println!("{}", args::get_version_string());
            return;
        }
        ArgumentsRequest::Help => {
            println!("{}", args::get_help_string());
            return;
        }
        ArgumentsRequest::Run(startup_args) => startup_args,
    };

    logging::init(startup_args.dev);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start Tokio runtime: {err}");
            exit(1);
        }
    };

    if let Err(error) = runtime.block_on(async_main(startup_args)) {
        error!("program finished with error: {error}");
        exit(1);
    }
}

async fn async_main(startup_args: StartupArguments) -> Result<(), Error> {
    info!("starting in {} mode", startup_args.startup_mode);

    let config = SessionConfig::new(SharedKey::derive(&startup_args.key), startup_args.idle_timeout);
    let kind = match startup_args.startup_mode {
        StartupMode::Local(local_config) => {
            info!("tunneling to {}", local_config.remote);
            SessionKind::Ingress { egress: local_config.remote }
        }
        StartupMode::Remote(remote_config) => SessionKind::Egress {
            dns_cache_ttl: remote_config.dns_cache_ttl,
        },
    };

    let listener = acceptor::bind_listener(startup_args.port)?;
    info!("listen at {}", startup_args.port);

    let sender = acceptor::spawn_worker(config, kind)?;
    acceptor::run_acceptor(listener, sender).await;
    Ok(())
}
