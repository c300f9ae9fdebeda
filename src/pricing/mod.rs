//! Pure pricing maths: position sizing, profit estimation and yield
//! projection. Nothing here touches a collaborator or the clock.

pub mod profit;
pub mod sizing;
pub mod yield_model;

pub use profit::{estimate_profit, parse_close_price, profit_at_price, ProfitEstimate};
pub use sizing::{size_position, PositionSizer, Sizing, SizingConfig, SizingRequest};
pub use yield_model::{project_yield, ray_to_percent, YieldProjection};
