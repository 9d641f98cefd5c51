fn main() {
    if let Err(err) = tunegrep::cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
