pub mod assertion;
pub mod cancel;
pub mod executor;
pub mod export;
pub mod http;
pub mod monitor;
pub mod scheduler;
pub mod stats;
pub mod template;
pub mod timing;
