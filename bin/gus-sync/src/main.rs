//! Thin entry point: delegates to [`gus_sync::run_with`] with the real
//! process argv and standard streams, then exits with the mapped code.

fn main() {
    let code = gus_sync::run_with(std::env::args(), std::io::stdout(), std::io::stderr());
    std::process::exit(code.as_i32());
}
