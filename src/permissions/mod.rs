//! Permission gate: per-tool policy plus human-in-the-loop decisions.

mod ask_user;
mod gate;

pub use ask_user::ask_user_tool;
pub use gate::{
    GateDecision, PermissionGate, PermissionRequest, RequestKind, PERMISSION_DENIED,
    REQUEST_EXPIRED,
};
