use clap::Parser;

fn main() {
    let cli = feedcastctl::Cli::parse();
    if let Err(err) = feedcastctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
