// Library interface for newsbrief modules
// This allows tests and the binary to import modules

pub mod article;
pub mod classifier;
pub mod dedup;
pub mod delivery;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod price;
pub mod ranking;
pub mod scraping;
pub mod storage;
