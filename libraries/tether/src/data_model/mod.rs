#[path = "1-record.rs"]
mod record;

#[path = "2-change-event.rs"]
mod change_event;

#[path = "3-observable.rs"]
mod observable;

#[path = "4-transform.rs"]
mod transform;

pub use change_event::*;
pub use observable::*;
pub use record::*;
pub use transform::*;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ListenerKey(pub(crate) slotmap::DefaultKey);
