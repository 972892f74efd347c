use std::{
    env,
    io::{self, BufWriter},
    process::ExitCode,
};

use env_logger::Env;
use log::{error, warn};

use args::{resolve, to_text, tokenize, usage, Resolution};
use batch::run_all;

mod args;
mod batch;
mod encode;
mod pipeline;

const USAGE_ERROR: u8 = 2;

fn main() -> ExitCode {
    let env = Env::new().default_filter_or("info");
    env_logger::init_from_env(env);

    let raw = to_text(env::args_os().skip(1));
    if raw.is_empty() {
        error!("No arguments given\n{}", usage());
        return ExitCode::from(USAGE_ERROR);
    }

    let tokens = tokenize(&raw);
    match resolve(&tokens) {
        Ok(Resolution::Help) => {
            println!("{}", usage());
            ExitCode::SUCCESS
        }
        Ok(Resolution::Run { config, files }) => {
            if files.is_empty() {
                warn!("No .ptcop files given, nothing to render");
            }
            let mut stdout = BufWriter::new(io::stdout().lock());
            run_all(&files, &config, ptcop::Service::new, &mut stdout);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}\n{}", usage());
            ExitCode::from(USAGE_ERROR)
        }
    }
}
