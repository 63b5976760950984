pub mod mock_coordinator;
pub mod mock_smtp;
