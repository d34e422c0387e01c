pub mod alpha;
pub mod artifact;
pub mod beta;
pub mod biom;
pub mod config;
pub mod metadata;
pub mod package;
pub mod picrust;
pub mod taxonomy;
