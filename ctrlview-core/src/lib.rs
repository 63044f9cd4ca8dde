// Windowed list engine
pub mod height;
pub mod renderer;
pub mod schedule;
pub mod subscription;
pub mod window;

// Controller resources and snapshot merging
pub mod merge;
pub mod model;
pub mod request;

// Streaming client
pub mod client;
pub mod collection;
pub mod history;
pub mod multiplexer;
pub mod transport;

pub mod config;
