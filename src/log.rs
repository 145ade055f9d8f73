use log::LevelFilter;

/// Install `env_logger` as the backend for the library's `log` calls.
///
/// Uses `Debug` when `debug_enabled` is set and `Info` otherwise. An explicit `RUST_LOG`
/// overrides both. Calling this twice is harmless; the second call is ignored.
pub fn init_logger(debug_enabled: bool) {
    let level = if debug_enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder
        .filter(None, level)
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if builder.try_init().is_ok() {
        log::debug!("logger initialized at {level:?} level");
    }
}
