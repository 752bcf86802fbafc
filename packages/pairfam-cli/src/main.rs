use clap::Parser;
use ctor::ctor;
use pairfam::utils::error::report_exit_code;
use pairfam::utils::global_init::{global_init, setup_logger};
use std::process::exit;

mod cli;

use cli::args::PairfamArgs;

#[ctor]
fn init() {
  global_init();
}

fn main() {
  let args = PairfamArgs::parse();
  setup_logger(args.verbosity);
  if let Err(report) = cli::run::run(&args) {
    eprintln!("{report:?}");
    exit(report_exit_code(&report));
  }
}
