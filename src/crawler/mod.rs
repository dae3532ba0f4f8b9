pub mod arxiv;

pub use arxiv::{ArxivCrawler, PaperItem};
