use tracing_subscriber::EnvFilter;

const DEV_FILTER: &str = "mole=debug,mole_proto=debug";
const DEFAULT_FILTER: &str = "mole=info,mole_proto=info";

/// Installs the global subscriber. `RUST_LOG` takes precedence over the `dev` flag.
pub fn init(dev: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(dev)));

    tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true).init();
}

fn default_filter(dev: bool) -> &'static str {
    match dev {
        true => DEV_FILTER,
        false => DEFAULT_FILTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_raises_verbosity() {
        assert_eq!(default_filter(true), "mole=debug,mole_proto=debug");
        assert_eq!(default_filter(false), "mole=info,mole_proto=info");
    }
}
