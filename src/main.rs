mod cli;
mod core;
mod platform;

use std::process;

fn main() {
    env_logger::init();

    let args = cli::parse();

    if let Err(e) = cli::commands::dispatch(args) {
        eprintln!("capsulerun: {e:#}");
        process::exit(1);
    }
}
