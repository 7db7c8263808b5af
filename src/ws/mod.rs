pub mod handler;
pub mod relay;

pub use handler::{retrieve_response, AxumSocket, RETRIEVE_RESPONSE_PATH};
pub use relay::{run_relay, RelayError, RelayOutcome, RelaySocket, ResponseFrame};
