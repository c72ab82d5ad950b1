//! The unit of work handed from a queueing layer to its workers.

use tokio::sync::oneshot;

use crate::error::Result;

/// A request paired with the one-shot slot its result is delivered on.
///
/// Dropping the reply sender (worker shutdown, cancelled job) surfaces as a
/// cancellation error on the requester side.
pub(crate) struct Job<Req, Res> {
    pub(crate) request: Req,
    pub(crate) reply: oneshot::Sender<Result<Res>>,
}
