pub mod rss;

pub use rss::RssAdapter;
