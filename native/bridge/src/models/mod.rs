mod device;
pub use device::*;
mod package;
pub use package::*;
mod settings;
pub use settings::*;
