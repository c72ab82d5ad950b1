//! WebSocket transport leaf, mock harness, robust reconnecting wrapper,
//! and test helpers.
//!
//! The WebSocket side of the stack serves `WsRequest → BoxRawResponse`:
//! a request dials (or fabricates) a bidirectional message stream, and the
//! response owns its incoming channel, its send half, and its lifecycle.

mod listener;
mod message;
mod mock;
mod request;
mod response;
mod robust;
mod tester;
mod transport;

pub use listener::{chain, listen_slice, Handler, HandlerFn, SliceListener};
pub use message::Message;
pub use mock::{
    mock_transport, with_generator_factory, with_scripted_side_effects, with_side_effects,
    with_side_effects_fn, Mock, MockOptions, MockResponse, SideEffect, SideEffectGenerator,
};
pub use request::WsRequest;
pub use response::{BoxRawResponse, RawResponse};
pub use robust::{
    with_auto_refresh_jitter, with_auto_refresh_period, with_robust, RobustConfig, RobustOptions,
};
pub use tester::Tester;
pub use transport::{
    transport, with_buffer_size, with_origin, with_protocol, with_receive_timeout,
    with_send_timeout, WsOptions, DEFAULT_BUFFER_SIZE, DEFAULT_ORIGIN,
};
