use env_logger::Env;
use log::LevelFilter;

/// One-time process setup: pretty error reports. Meant to be called from a
/// `ctor` constructor in binaries.
pub fn global_init() {
  if let Err(report) = color_eyre::config::HookBuilder::default()
    .display_env_section(false)
    .install()
  {
    eprintln!("{report}");
  }
}

pub fn setup_logger(filter_level: LevelFilter) {
  let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(filter_level.as_str()));
  builder.format_timestamp(None);
  if builder.try_init().is_err() {
    // a logger is already installed (e.g. in tests); keep it
  }
}
