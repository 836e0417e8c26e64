pub mod in_memory;
pub mod http_client;
pub mod page_fetcher;
