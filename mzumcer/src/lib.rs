pub mod config;
mod driver;
pub mod mass_range;
pub mod pek;
pub mod reader;
pub mod write;

pub use config::{DataFilters, Settings, UMCCreationOptions};
pub use driver::{InputFormat, MZUMCer, MZUMCerError};
pub use pek::PekReader;
pub use reader::IsosCsvReader;
