use std::{fmt, net::SocketAddr, time::Duration};

use super::{
    parse_port_number_arg, parse_seconds_arg, parse_socket_arg, ArgumentsRequest, PortErrorType, SecondsErrorType, SocketErrorType,
    StartLocalConfig, StartRemoteConfig, StartupArguments, StartupMode, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT,
};

#[derive(Debug, PartialEq, Eq)]
pub enum ArgumentsError {
    UnknownArgument(String),
    UnexpectedEnd(String),
    InvalidMode(String, String),
    Remote(SocketErrorType),
    Port(PortErrorType),
    IdleTimeout(SecondsErrorType),
    DnsCacheTtl(SecondsErrorType),
    MissingMode,
    MissingKey,
    EmptyKey,
    MissingRemote,
    LocalFoundRemoteArgument(String),
    RemoteFoundLocalArgument(String),
}

impl fmt::Display for ArgumentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownArgument(arg) => write!(f, "Unknown argument: {arg}"),
            Self::UnexpectedEnd(arg) => write!(f, "Expected a value after {arg}"),
            Self::InvalidMode(arg, arg2) => write!(f, "Invalid mode after {arg}: {arg2}, expected local or remote"),
            Self::Remote(socket_error) => socket_error.fmt(f),
            Self::Port(port_error) => port_error.fmt(f),
            Self::IdleTimeout(seconds_error) => seconds_error.fmt(f),
            Self::DnsCacheTtl(seconds_error) => seconds_error.fmt(f),
            Self::MissingMode => write!(f, "A mode must be specified with --mode local or --mode remote"),
            Self::MissingKey => write!(f, "A key must be specified with --key"),
            Self::EmptyKey => write!(f, "The key must not be empty"),
            Self::MissingRemote => write!(f, "When running on local mode, a remote address must be specified"),
            Self::LocalFoundRemoteArgument(arg) => write!(f, "Running on local mode, but {arg} is only valid in remote mode"),
            Self::RemoteFoundLocalArgument(arg) => write!(f, "Running on remote mode, but {arg} is only valid in local mode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeArg {
    Local,
    Remote,
}

struct StartupArgumentsParser {
    dev: bool,
    mode: Option<ModeArg>,
    key: Option<String>,
    remote: Option<(String, SocketAddr)>,
    port: u16,
    idle_timeout: Option<Duration>,
    dns_cache_ttl: Option<(String, Option<Duration>)>,
}

impl StartupArgumentsParser {
    const fn new() -> Self {
        Self {
            dev: false,
            mode: None,
            key: None,
            remote: None,
            port: DEFAULT_PORT,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            dns_cache_ttl: None,
        }
    }

    fn complete(self) -> Result<StartupArguments, ArgumentsError> {
        let key = match self.key {
            Some(key) if key.is_empty() => return Err(ArgumentsError::EmptyKey),
            Some(key) => key,
            None => return Err(ArgumentsError::MissingKey),
        };

        let startup_mode = match self.mode {
            None => return Err(ArgumentsError::MissingMode),
            Some(ModeArg::Local) => {
                if let Some((arg, _)) = self.dns_cache_ttl {
                    return Err(ArgumentsError::LocalFoundRemoteArgument(arg));
                }

                match self.remote {
                    Some((_, remote)) => StartupMode::Local(StartLocalConfig { remote }),
                    None => return Err(ArgumentsError::MissingRemote),
                }
            }
            Some(ModeArg::Remote) => {
                if let Some((arg, _)) = self.remote {
                    return Err(ArgumentsError::RemoteFoundLocalArgument(arg));
                }

                let dns_cache_ttl = self.dns_cache_ttl.and_then(|(_, ttl)| ttl);
                StartupMode::Remote(StartRemoteConfig { dns_cache_ttl })
            }
        };

        Ok(StartupArguments {
            dev: self.dev,
            key,
            port: self.port,
            idle_timeout: self.idle_timeout,
            startup_mode,
        })
    }
}

fn parse_mode_arg(arg: String, maybe_arg2: Option<String>) -> Result<ModeArg, ArgumentsError> {
    let arg2 = match maybe_arg2 {
        Some(arg2) => arg2,
        None => return Err(ArgumentsError::UnexpectedEnd(arg)),
    };

    if arg2.eq_ignore_ascii_case("local") {
        Ok(ModeArg::Local)
    } else if arg2.eq_ignore_ascii_case("remote") {
        Ok(ModeArg::Remote)
    } else {
        Err(ArgumentsError::InvalidMode(arg, arg2))
    }
}

fn try_parse_general_argument<F>(
    result: &mut StartupArgumentsParser,
    maybe_arg: &mut Option<String>,
    get_next_arg: F,
) -> Result<bool, ArgumentsError>
where
    F: FnOnce() -> Option<String>,
{
    let arg = match maybe_arg.take() {
        Some(s) => s,
        None => return Ok(false),
    };

    if arg.eq("-d") || arg.eq_ignore_ascii_case("--dev") {
        result.dev = true;
    } else if arg.eq("-m") || arg.eq_ignore_ascii_case("--mode") {
        result.mode = Some(parse_mode_arg(arg, get_next_arg())?);
    } else if arg.eq("-k") || arg.eq_ignore_ascii_case("--key") {
        match get_next_arg() {
            Some(key) => result.key = Some(key),
            None => return Err(ArgumentsError::UnexpectedEnd(arg)),
        }
    } else if arg.eq("-p") || arg.eq_ignore_ascii_case("--port") {
        result.port = parse_port_number_arg(arg, get_next_arg()).map_err(ArgumentsError::Port)?.get();
    } else if arg.eq_ignore_ascii_case("--idle-timeout") {
        result.idle_timeout = parse_seconds_arg(arg, get_next_arg()).map_err(ArgumentsError::IdleTimeout)?;
    } else {
        *maybe_arg = Some(arg);
    }

    Ok(maybe_arg.is_none())
}

fn try_parse_local_argument<F>(
    result: &mut StartupArgumentsParser,
    maybe_arg: &mut Option<String>,
    get_next_arg: F,
) -> Result<bool, ArgumentsError>
where
    F: FnOnce() -> Option<String>,
{
    let arg = match maybe_arg.take() {
        Some(s) => s,
        None => return Ok(false),
    };

    if arg.eq("-r") || arg.eq_ignore_ascii_case("--remote") {
        let remote = parse_socket_arg(arg.clone(), get_next_arg()).map_err(ArgumentsError::Remote)?;
        result.remote = Some((arg, remote));
    } else {
        *maybe_arg = Some(arg);
    }

    Ok(maybe_arg.is_none())
}

fn try_parse_remote_argument<F>(
    result: &mut StartupArgumentsParser,
    maybe_arg: &mut Option<String>,
    get_next_arg: F,
) -> Result<bool, ArgumentsError>
where
    F: FnOnce() -> Option<String>,
{
    let arg = match maybe_arg.take() {
        Some(s) => s,
        None => return Ok(false),
    };

    if arg.eq_ignore_ascii_case("--dns-cache-ttl") {
        let ttl = parse_seconds_arg(arg.clone(), get_next_arg()).map_err(ArgumentsError::DnsCacheTtl)?;
        result.dns_cache_ttl = Some((arg, ttl));
    } else {
        *maybe_arg = Some(arg);
    }

    Ok(maybe_arg.is_none())
}

pub fn parse_arguments<T>(mut args: T) -> Result<ArgumentsRequest, ArgumentsError>
where
    T: Iterator<Item = String>,
{
    let mut result = StartupArgumentsParser::new();

    // Ignore the first argument, as it's by convention the name of the program
    args.next();

    while let Some(arg) = args.next() {
        if arg.is_empty() {
            continue;
        } else if arg.eq("-h") || arg.eq_ignore_ascii_case("--help") {
            return Ok(ArgumentsRequest::Help);
        } else if arg.eq("-V") || arg.eq_ignore_ascii_case("--version") {
            return Ok(ArgumentsRequest::Version);
        }

        let mut maybe_arg = Some(arg);
        let _ = !try_parse_general_argument(&mut result, &mut maybe_arg, || args.next())?
            && !try_parse_local_argument(&mut result, &mut maybe_arg, || args.next())?
            && !try_parse_remote_argument(&mut result, &mut maybe_arg, || args.next())?;

        if let Some(arg) = maybe_arg {
            return Err(ArgumentsError::UnknownArgument(arg));
        }
    }

    let result = result.complete()?;
    Ok(ArgumentsRequest::Run(result))
}
