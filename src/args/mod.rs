use std::{fmt, net::SocketAddr, time::Duration};

mod addresses;
mod numbers;
mod parser;

pub use addresses::*;
pub use numbers::*;
pub use parser::*;

/// The default port to listen on, in both modes.
pub const DEFAULT_PORT: u16 = 20903;

/// The default amount of seconds a session may wait on a read before giving up.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Gets a small string with this program's name and version.
pub fn get_version_string() -> String {
    format!(
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), " ({} {})"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Gets a string with this program's help documentation.
pub fn get_help_string() -> &'static str {
    concat!(
        "Usage: mole --mode <local|remote> --key <passphrase> [options]\n",
        "\n",
        "In local mode, mole accepts SOCKS5 clients and tunnels their connections, encrypted, to a\n",
        "mole running in remote mode, which connects to the requested destinations.\n",
        "\n",
        "Options:\n",
        "  -m, --mode <local|remote>   Whether to run as the SOCKS5 side (local) or the exit side (remote)\n",
        "  -k, --key <passphrase>      Shared passphrase, must be the same on both sides\n",
        "  -r, --remote <host:port>    Address of the remote-mode mole (local mode only)\n",
        "  -p, --port <port>           Port to listen on (default 20903)\n",
        "  -d, --dev                   Print debug logs\n",
        "      --idle-timeout <secs>   Drop sessions idle for this long, 0 to never (default 300)\n",
        "      --dns-cache-ttl <secs>  Cache resolved domain names for this long (remote mode only)\n",
        "  -h, --help                  Print this help menu and exit\n",
        "  -V, --version               Print the version and exit\n",
        "\n",
        "The RUST_LOG environment variable overrides the log filter."
    )
}

/// The result of parsing the program's arguments.
#[derive(Debug, PartialEq)]
pub enum ArgumentsRequest {
    /// Print the help menu to stdout and exit.
    Help,

    /// Print this program's version to stdout and exit.
    Version,

    /// Run with the provided arguments.
    Run(StartupArguments),
}

/// Specifies the information on how the program should run.
#[derive(Debug, PartialEq)]
pub struct StartupArguments {
    /// Whether to print debug logs.
    pub dev: bool,

    /// The shared passphrase. Never empty.
    pub key: String,

    /// The port to listen for incoming connections on.
    pub port: u16,

    /// How long a read may wait before the session is dropped. `None` waits forever.
    pub idle_timeout: Option<Duration>,

    /// Whether to run in local or remote mode.
    pub startup_mode: StartupMode,
}

/// Specifies whether the program should start in local (ingress) or remote (egress) mode.
#[derive(Debug, PartialEq)]
pub enum StartupMode {
    Local(StartLocalConfig),
    Remote(StartRemoteConfig),
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => write!(f, "local"),
            Self::Remote(_) => write!(f, "remote"),
        }
    }
}

/// Specifies configuration when starting in local mode.
#[derive(Debug, PartialEq)]
pub struct StartLocalConfig {
    /// The address of the remote-mode peer every tunnel is opened to.
    pub remote: SocketAddr,
}

/// Specifies configuration when starting in remote mode.
#[derive(Debug, PartialEq)]
pub struct StartRemoteConfig {
    /// How long resolved domain names are cached. `None` disables the cache.
    pub dns_cache_ttl: Option<Duration>,
}
