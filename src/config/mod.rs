//! Framework options: schema, defaults, and JSON loading.

mod load;
mod schema;

pub use load::{LoadOutcome, load_or_default, save};
pub use schema::{ApServerOptions, Options, RetryOptions, ThreadingOptions, TimeoutOptions};
