use clap::Parser;

use tsil_cli::args::CliArgs;
use tsil_cli::driver;

fn main() {
    let args = CliArgs::parse();
    driver::init_tracing(&args);
    std::process::exit(driver::run(args));
}
