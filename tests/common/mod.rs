// Shared test infrastructure for integration suites.

pub mod mock_drive;

#[allow(unused_imports)]
pub use mock_drive::{MockDrive, MockDriveConfig, MockSectorSource};
