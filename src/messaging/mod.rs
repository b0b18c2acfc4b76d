pub mod bus;
pub mod event;

pub use bus::{EventBus, Subscription};
pub use event::{EventMessage, EventType};
