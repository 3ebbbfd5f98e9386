//! Relay state: the shared selection and the fan-out hub

pub mod hub;
pub mod selection;

pub use hub::{Outbound, RelayClosed, RelayCommand, RelayHandle, RelayHub, RelayStatus, Subscription};
pub use selection::{RocketId, Selection, SelectionError, MAX_SELECTED};
