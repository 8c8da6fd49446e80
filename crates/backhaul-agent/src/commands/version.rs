//! Version command implementation.

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() {
    println!("backhaul {VERSION}");
    println!();
    println!("Host metrics over a reverse TLS connection.");
    println!();
    println!("Build info:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
}
