//! Hardware drivers — the only code that touches GPIO and the TWDT.

pub mod tip_sensor;
pub mod watchdog;
