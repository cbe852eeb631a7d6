pub mod assembler;
pub mod cancel;
pub mod fetcher;
pub mod pager;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod rows;
pub mod sellers;
pub mod types;

#[cfg(test)]
pub mod testing;
