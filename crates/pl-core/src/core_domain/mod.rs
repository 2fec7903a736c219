mod auth;
mod dialog;
mod error;
mod lifecycle;
mod limits;
mod model;
mod ports;
mod ratings;
mod speak_order;
mod turns;
mod types;

pub use auth::*;
pub use dialog::*;
pub use error::*;
pub use lifecycle::*;
pub use limits::*;
pub use model::*;
pub use ports::*;
pub use ratings::*;
pub use speak_order::*;
pub use turns::*;
pub use types::*;
