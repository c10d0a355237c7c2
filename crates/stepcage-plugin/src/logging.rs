//! Idempotent `env_logger` initialization. The step manager may call into
//! the plugin's entry points from more than one thread or reload the
//! plugin across steps, so this must tolerate being called repeatedly.

use stepcage_model::NodeConfig;

/// Initializes `env_logger` once. `RUST_LOG`, if set, always wins; absent
/// that, falls back to `node.log_level`, then to `warn`.
pub fn init(node: &NodeConfig) {
    let mut builder = env_logger::Builder::new();
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| node.log_level.clone())
        .unwrap_or_else(|| "warn".to_owned());
    builder.parse_filters(&filter);
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_safe_to_call_more_than_once() {
        let node = NodeConfig::default();
        init(&node);
        init(&node);
    }
}
