pub mod process;

pub use process::ProcessCollector;
