mod driver;
pub mod ladder;
mod state;

pub use driver::{AccountDriver, DriverExit, DriverStatus};
pub use state::AccountState;
