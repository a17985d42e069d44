//! leafscan - command-line client for the leaf diagnosis service.

fn main() -> anyhow::Result<()> {
    leafscan::cli::run()
}
