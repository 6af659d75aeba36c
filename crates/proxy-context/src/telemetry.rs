use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `level` when set. Returns `false` if a subscriber was
/// already installed, which happens when several contexts share a process.
pub fn init_tracing(level: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let installed = if json {
        builder.json().with_thread_ids(true).try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let _ = init_tracing("debug", true);
        assert!(!init_tracing("info", false));
    }
}
