fn main() {
    if let Err(err) = spaila_pad::cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
