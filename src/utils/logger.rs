/// Installs the global logger. `RUST_LOG` overrides the default `info` level.
pub fn setup_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
