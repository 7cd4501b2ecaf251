pub mod feedback;
pub mod finetune;
pub mod generate;
pub mod http_utils;
pub mod models;
pub mod spec;
