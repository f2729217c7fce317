pub mod analysis_types;
