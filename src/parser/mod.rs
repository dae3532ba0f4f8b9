pub mod affiliation;
pub mod figure;

pub use affiliation::AffiliationExtractor;
pub use figure::FigureExtractor;
