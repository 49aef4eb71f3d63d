mod settings;

pub use settings::{
    BrokerConfig, LoggingConfig, OtelConfig, QueuePolicy, ResolvedConfig, Settings,
    SERVICE_MAX_BATCH_BYTES, SERVICE_MAX_BATCH_ENTRIES,
};
