pub mod controller;
pub mod window;

pub use controller::{FlowController, OutgoingGrant};
pub use window::{AxisState, InboundAxis, OutboundAxis, TotalBudget};
