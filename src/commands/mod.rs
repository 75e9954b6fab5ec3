pub mod fetch;
pub mod load;
pub mod mappings;
pub mod summarize;
