// FlowGrid terminal viewer: cluster grid, editing, plain-text output

pub mod plain;
pub mod tui;
mod util;
