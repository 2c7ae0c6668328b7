//! crossrun CLI entry point

fn main() {
    // Status lines go to stdout; keep logs quiet on stderr unless asked for
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    crossrun::cli::run();
}
