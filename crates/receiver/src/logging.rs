use crate::config::StreamConfig;

pub fn setup_logging(config: &StreamConfig) {
    common::setup_logging(config.environment);
}
