//! puller-worker binary entry point.

fn main() {
    if let Err(e) = branch_puller::cli::run() {
        eprintln!("puller-worker: {:#}", e);
        std::process::exit(1);
    }
}
