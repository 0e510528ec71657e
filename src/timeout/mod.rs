mod body;
mod capture;
mod future;
mod layer;
mod racer;
mod resolver;
mod service;

pub use body::TimeoutBody;
pub use capture::ResponseCapture;
pub use future::ResponseFuture;
pub use layer::TimeoutLayer;
pub use racer::{HandlerPanic, RaceOutcome, race};
pub use service::{RequestDeadline, TimeoutService};
