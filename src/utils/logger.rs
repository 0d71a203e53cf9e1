use env_logger::{Builder, Env};

/// Initializes logging once; repeated calls (tests, embedding) are no-ops.
pub fn init() {
	let _ = Builder::from_env(Env::default().default_filter_or("info"))
		.format_timestamp_millis()
		.format_module_path(true)
		.try_init();
}
