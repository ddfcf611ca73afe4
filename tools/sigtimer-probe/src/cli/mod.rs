pub mod args;

pub use args::{parse_args, plan, print_completion, timer_options, Config, ParseOutcome, Plan};
