//! Resolves the addresses given on the command line (hex, `0x` optional), or a
//! few well known ones if there are none.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

fn parse_address(arg: &str) -> Option<usize> {
    let digits = arg.strip_prefix("0x").unwrap_or(arg);
    usize::from_str_radix(digits, 16).ok()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut addresses = Vec::new();
    for arg in std::env::args().skip(1) {
        let Some(address) = parse_address(&arg) else {
            eprintln!("not a hex address: {arg}");
            return ExitCode::FAILURE;
        };
        addresses.push(address);
    }

    if addresses.is_empty() {
        addresses = vec![
            main as usize,
            libc::malloc as usize,
            // Nothing is ever mapped here.
            0x10,
        ];
    }

    for frame in objaddr::resolve_all(&addresses) {
        println!("{frame}");
    }
    ExitCode::SUCCESS
}
