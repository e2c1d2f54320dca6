pub mod aggregate;
pub mod config;
pub mod fetch;
pub mod history;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod readme;
pub mod render;
pub mod report;
pub mod table;
