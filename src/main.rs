fn main() {
    #[cfg(feature = "cli")]
    bpsdelta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("bpsdelta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
