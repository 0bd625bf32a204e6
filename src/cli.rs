//! CLI domain: parse, route and output, plus the ledger demo the `demo` command runs.

mod demo;
mod output;
mod parse;
mod route;

pub use demo::{
    ledger_registry, run_demo, Account, Balances, DemoReport, DemoStep, Deposit, OpenAccount,
    Transfer,
};
pub use output::map_error;
pub use parse::{Cli, Commands};
pub use route::RunContext;
