use std::process::ExitCode;

#[cfg(feature = "mimalloc-allocator")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    ngs_coverage::init_tracing();
    match ngs_coverage::cli::parse_from_env().and_then(ngs_coverage::run_from_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ngscov: {error}");
            ExitCode::from(1)
        }
    }
}
