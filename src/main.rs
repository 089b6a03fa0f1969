fn main() {
    if let Err(err) = apiwatch::cli::run() {
        apiwatch::ui::eprintln_error(&err);
        std::process::exit(apiwatch::exit::exit_code(&err));
    }
}
