pub mod output;
pub mod sink;

pub use output::{format_log_prefix, LogKind, OutputSession, SessionOptions};
pub use sink::{BoxedSink, ConsoleTarget, Decorated, FanOut, MemorySink, SharedFile};
