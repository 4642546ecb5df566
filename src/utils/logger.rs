use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Initialise the global logger. `RUST_LOG` wins over `default_filter`.
pub fn setup_logging(default_filter: &str) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));

    builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

    // A second initialisation (tests, embedding) is not an error.
    let _ = builder.try_init();
}
