//! Command implementations for the tk CLI.
//!
//! `package` covers the add-on registry, `software` the per-add-on software.

pub mod package;
pub mod software;

/// Print `value` as pretty JSON, exiting on encoding failure.
pub(crate) fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!(
                "{} Failed to serialize JSON: {}",
                console::style("error:").red().bold(),
                e
            );
            std::process::exit(1);
        }
    }
}
