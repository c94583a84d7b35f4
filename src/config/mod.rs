mod settings;

pub use settings::{
    BrokerConfig, BulkFailureMode, ChannelTopics, DispatchConfig, OtelConfig, ServerConfig,
    Settings, TopicsConfig,
};
