pub mod chunk;
pub mod config;
pub mod document;
pub mod error;
pub mod interactive;
pub mod keys;
pub mod orchestrator;
pub mod pipeline;
pub mod project;
pub mod translate;

pub use config::Config;
pub use error::{Result, TranslateError};
pub use pipeline::{
    collect_inputs, print_summary, translate_batch, translate_file, BatchReport, FileReport,
    InputFile, TranslateOptions, TranslationContext,
};
