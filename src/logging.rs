use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is not set.
pub fn default_directives(debug: bool) -> &'static str {
    if debug {
        "debug,serenity=info,h2=warn,hyper=warn,rustls=warn"
    } else {
        "info,serenity=warn,h2=warn,hyper=warn,rustls=warn"
    }
}

/// Install the global fmt subscriber. `RUST_LOG` wins over the debug flag.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        for debug in [false, true] {
            assert!(default_directives(debug).parse::<EnvFilter>().is_ok());
        }
        assert!(default_directives(true).starts_with("debug"));
        assert!(default_directives(false).starts_with("info"));
    }
}
