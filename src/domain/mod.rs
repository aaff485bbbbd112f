pub mod normalizer;
pub mod provider_record;
pub mod selector;
pub mod source_spec;
pub mod structured_data;
