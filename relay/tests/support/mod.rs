pub mod harness;
#[path = "../../../relay-agent/tests/support/mock_smtp.rs"]
pub mod mock_smtp;
