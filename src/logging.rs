use env_logger::Env;

/// Installs `env_logger` with `level` as the fallback filter. `RUST_LOG` wins
/// when set. Calling it again after a logger exists is a no-op.
pub fn init_logger(level: &str) {
    let result = env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logger("debug");
        init_logger("info");
        log::info!("logger still usable");
    }
}
