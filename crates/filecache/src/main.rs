//! File cache.
//!
//! A command line interface to a local disk cache for remote and storage-backed files. It is
//! primarily used to prune the cache from a scheduler, and to inspect the cache by hand.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
