//! Small, explicit configuration surface for the server accept loop and client-role
//! dialing, in the spirit of the teacher's `WebSocketConfig`.

/// Tuning knobs for [`crate::server::WebSocketServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Backlog passed to `listen`.
    pub backlog: i32,
    /// Initial size of each worker's read/send byte buffer; doubled on demand.
    pub initial_buffer_size: usize,
    /// Hard cap on the payload of a single outgoing frame (SPEC_FULL.md §4.2/§6).
    pub max_frame_payload: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: 8,
            initial_buffer_size: 4096,
            max_frame_payload: crate::frame::MAX_FRAME_PAYLOAD,
        }
    }
}

/// Tuning knobs for [`crate::client::Client::connect`] (client-role dialing).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub initial_buffer_size: usize,
    pub max_frame_payload: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: 4096,
            max_frame_payload: crate::frame::MAX_FRAME_PAYLOAD,
        }
    }
}
