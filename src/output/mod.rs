mod report;

pub use report::{report, report_phases, Summary};
