use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "buildlore=debug,info"
    } else {
        "info"
    }
}

/// Installs the global tracing subscriber. Logs go to stderr so stdout stays
/// free for invocation output. Calling it twice is harmless.
pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        for verbose in [false, true] {
            assert!(default_directive(verbose).parse::<EnvFilter>().is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false, false);
        init(true, true);
    }
}
