mod backup;
pub use backup::*;
mod settings;
pub use settings::*;
