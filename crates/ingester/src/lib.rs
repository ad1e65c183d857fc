pub mod config;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod summarizer;

#[cfg(test)]
mod test_support;
