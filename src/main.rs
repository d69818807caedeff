fn main() {
    if let Err(err) = csv_overlay::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
