mod handler;
mod model;

pub use handler::{subscribe, unsubscribe};
pub use model::{EmailRequest, Subscriber, Subscription};
