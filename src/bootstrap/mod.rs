mod coordinator;
pub mod settings;

pub use coordinator::{Coordinator, ExitOutcome};
pub use settings::{
    load as load_config, Config, ConfigError, DownloadEntry, FetchBackend, Limits, Manifest,
    Plugin, PluginEntry, Token,
};
