// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Exports run, check and compare

pub mod check;
pub mod compare;
pub mod run;

pub use check::check;
pub use compare::compare;
pub use run::run;
