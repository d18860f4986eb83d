pub use error::{WatchBoxError, WatchBoxExit};
pub use request::Request;
pub use sink::{Append, BoundedBuffer};
pub use verdict::Verdict;
pub use watchbox::run;

mod error;
mod monitor;
mod pipe;
mod pstree;
mod request;
mod sink;
mod utils;
mod verdict;
mod watchbox;
