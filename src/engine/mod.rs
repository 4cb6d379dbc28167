pub mod dispatcher;

pub use dispatcher::{connect_bus, dispatch, DispatchError, Dispatcher, DEFAULT_TICK_PERIOD};
