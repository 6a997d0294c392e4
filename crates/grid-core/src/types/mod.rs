//! Canonical data model shared by adapters and the slot engine.
//!
//! Exchange wire formats are normalized into these types at the adapter
//! boundary; nothing above the adapter sees venue symbols or venue enums.

pub mod enums;
pub mod market_data;
pub mod trading;

pub use enums::*;
pub use market_data::*;
pub use trading::*;
