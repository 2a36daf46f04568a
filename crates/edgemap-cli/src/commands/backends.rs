//! Backends command
//!
//! Lists compiled-in compute backends and which one `auto` picks.

use anyhow::Result;
use edgemap_compute::{describe_backends, select_best_backend};
use tracing::trace;

pub fn run(verbose: u8) -> Result<()> {
    trace!("backends::run");

    print!("{}", describe_backends());
    if verbose > 0 {
        println!("auto -> {}", select_best_backend());
    }
    Ok(())
}
