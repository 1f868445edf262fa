mod anomaly;
mod fix;
mod report;
mod stats;
mod vessel;

pub use anomaly::*;
pub use fix::*;
pub use report::*;
pub use stats::*;
pub use vessel::*;
